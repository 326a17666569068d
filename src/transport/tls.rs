//! # TLS Transport Layer
//!
//! Wraps any transport in TLS using rustls.
//!
//! The server role presents the certificate chain and PKCS#8 key named in
//! [`TlsConfig`]. The client role validates the server certificate through a
//! [`ServerCertVerifier`]. Unless the application plugs in its own verifier,
//! WebPKI verification is used against the roots in `ca_path` (or the
//! platform's native roots), and any chain that is not fully trusted for the
//! configured `server_name` is rejected.
//!
//! ## Responsibilities
//! - Load certificates, keys and trust roots
//! - Perform the handshake in the direction selected by [`Role`]
//! - Generate self-signed identities for development and tests

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::client::ServerCertVerifier;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, instrument, warn};

use crate::config::TlsConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::{Role, Stream};

fn load_certs(path: &str) -> Result<Vec<Certificate>> {
    let file = File::open(path)
        .map_err(|e| ProtocolError::TlsError(format!("Failed to open cert file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    let chain = certs(&mut reader)
        .map_err(|_| ProtocolError::TlsError(format!("Failed to parse certificate {path}")))?;

    if chain.is_empty() {
        return Err(ProtocolError::TlsError(format!(
            "No certificates found in {path}"
        )));
    }

    Ok(chain.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &str) -> Result<PrivateKey> {
    let file = File::open(path)
        .map_err(|e| ProtocolError::TlsError(format!("Failed to open key file {path}: {e}")))?;
    let mut reader = BufReader::new(file);
    let mut keys = pkcs8_private_keys(&mut reader)
        .map_err(|_| ProtocolError::TlsError("Failed to parse private key".into()))?;

    if keys.is_empty() {
        return Err(ProtocolError::TlsError("No private keys found".into()));
    }

    Ok(PrivateKey(keys.swap_remove(0)))
}

fn load_roots(tls: &TlsConfig) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    if let Some(ref ca_path) = tls.ca_path {
        for cert in load_certs(ca_path)? {
            root_store.add(&cert).map_err(|e| {
                ProtocolError::TlsError(format!("Failed to add CA cert to root store: {e}"))
            })?;
        }
        debug!(roots = root_store.len(), ca = %ca_path, "Loaded trust roots from CA file");
    } else {
        let native_certs = rustls_native_certs::load_native_certs()
            .map_err(|e| ProtocolError::TlsError(format!("Failed to load native certs: {e}")))?;
        let (added, skipped) = root_store.add_parsable_certificates(
            &native_certs.into_iter().map(|c| c.0).collect::<Vec<_>>(),
        );
        if skipped > 0 {
            warn!(skipped, "Skipped unparsable native root certificates");
        }
        debug!(roots = added, "Loaded native trust roots");
    }

    Ok(root_store)
}

/// Build the server-side rustls configuration
pub fn load_server_config(tls: &TlsConfig) -> Result<ServerConfig> {
    let (cert_path, key_path) = match (&tls.cert_path, &tls.key_path) {
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(ProtocolError::TlsError(
                "Server role requires cert_path and key_path".into(),
            ))
        }
    };

    let cert_chain = load_certs(cert_path)?;
    let private_key = load_private_key(key_path)?;

    ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))
}

/// Build the client-side rustls configuration.
///
/// `verifier` replaces the default WebPKI check when supplied.
pub fn load_client_config(
    tls: &TlsConfig,
    verifier: Option<Arc<dyn ServerCertVerifier>>,
) -> Result<ClientConfig> {
    let builder = ClientConfig::builder().with_safe_defaults();

    let config = match verifier {
        Some(verifier) => builder
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth(),
        None => builder
            .with_root_certificates(load_roots(tls)?)
            .with_no_client_auth(),
    };

    Ok(config)
}

fn server_name(tls: &TlsConfig) -> Result<ServerName> {
    let name = tls
        .server_name
        .as_deref()
        .ok_or_else(|| ProtocolError::TlsError("Client role requires server_name".into()))?;
    ServerName::try_from(name)
        .map_err(|_| ProtocolError::TlsError(format!("Invalid server name: {name}")))
}

/// Run the TLS handshake over `io` for the given role
#[instrument(skip(io, tls, verifier), level = "debug")]
pub async fn handshake<T>(
    role: Role,
    io: T,
    tls: &TlsConfig,
    verifier: Option<Arc<dyn ServerCertVerifier>>,
) -> Result<Stream<T>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let stream: tokio_rustls::TlsStream<T> = match role {
        Role::Server => {
            let acceptor = TlsAcceptor::from(Arc::new(load_server_config(tls)?));
            acceptor
                .accept(io)
                .await
                .map_err(|e| ProtocolError::TlsError(format!("TLS accept failed: {e}")))?
                .into()
        }
        Role::Client => {
            let connector = TlsConnector::from(Arc::new(load_client_config(tls, verifier)?));
            connector
                .connect(server_name(tls)?, io)
                .await
                .map_err(|e| ProtocolError::TlsError(format!("TLS connection failed: {e}")))?
                .into()
        }
    };

    debug!("TLS handshake complete");
    Ok(Stream::Tls(Box::new(stream)))
}

/// Generate a self-signed certificate and key for development/testing purposes.
///
/// Writes PEM files to `cert_path` and `key_path` and returns a server-role
/// [`TlsConfig`] pointing at them.
pub fn generate_self_signed<P: AsRef<Path>>(
    cert_path: P,
    key_path: P,
    subject_names: Vec<String>,
) -> io::Result<TlsConfig> {
    let cert = rcgen::generate_simple_self_signed(subject_names)
        .map_err(|e| io::Error::other(format!("Certificate generation error: {e}")))?;

    let mut cert_file = File::create(&cert_path)?;
    cert_file.write_all(cert.cert.pem().as_bytes())?;

    let mut key_file = File::create(&key_path)?;
    key_file.write_all(cert.signing_key.serialize_pem().as_bytes())?;

    Ok(TlsConfig::server(
        cert_path.as_ref().to_string_lossy().to_string(),
        key_path.as_ref().to_string_lossy().to_string(),
    ))
}

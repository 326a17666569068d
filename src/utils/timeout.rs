//! Timeout defaults and async timeout wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout for outbound TCP connects
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the TLS handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default application-layer keep-alive interval
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default idle time before the transport-level keep-alive probes
pub const TCP_KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Timeout for graceful listener shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on flushing and shutting down a transport during dispose
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// How often an accept loop drops closed connections from its live set
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Run `fut`, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Run an I/O future with an optional deadline.
///
/// Expiry surfaces as `io::ErrorKind::TimedOut`, the same shape a socket-level
/// receive timeout produces.
pub async fn io_deadline<F, T>(fut: F, duration: Option<Duration>) -> std::io::Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match duration {
        Some(d) => tokio::time::timeout(d, fut).await.unwrap_or_else(|_| {
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "receive timeout elapsed",
            ))
        }),
        None => fut.await,
    }
}

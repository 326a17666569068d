//! # Configuration Management
//!
//! Centralized configuration for connections and logging.
//!
//! A [`ConnectionConfig`] is snapshotted by every connection at start: socket
//! buffer sizes, linger and no-delay options, the receive timeout, the
//! application-layer keep-alive and the TLS settings.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Keep-alive
//! When `keepalive.enabled` is set, the connection sends a zero-length unit
//! after `keepalive.interval` without outbound traffic. Otherwise the
//! transport's native TCP keep-alive (`tcp_keepalive`) is requested instead.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Largest framed payload (opcode + body) the 2-byte length field can describe
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Largest body a single payload may carry (one byte goes to the opcode)
pub const MAX_BODY_LEN: usize = MAX_FRAME_LEN - 1;

/// Default socket receive/send buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Upper bound accepted for socket buffer sizes
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Top-level configuration file layout
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Per-connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `OPWIRE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<usize>("OPWIRE_RECEIVE_BUFFER_SIZE") {
            config.connection.receive_buffer_size = val;
        }

        if let Some(val) = env_parse::<usize>("OPWIRE_SEND_BUFFER_SIZE") {
            config.connection.send_buffer_size = val;
        }

        if let Some(val) = env_parse::<bool>("OPWIRE_NO_DELAY") {
            config.connection.no_delay = val;
        }

        if let Some(val) = env_parse::<bool>("OPWIRE_KEEPALIVE_ENABLED") {
            config.connection.keepalive.enabled = val;
        }

        if let Some(val) = env_parse::<u64>("OPWIRE_KEEPALIVE_INTERVAL_MS") {
            config.connection.keepalive.interval = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<u64>("OPWIRE_RECEIVE_TIMEOUT_MS") {
            config.connection.receive_timeout = Some(Duration::from_millis(val));
        }

        if let Some(val) = env_parse::<bool>("OPWIRE_TLS_ENABLED") {
            config.connection.tls.enabled = val;
        }

        if let Ok(level) = std::env::var("OPWIRE_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level in OPWIRE_LOG_LEVEL: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.connection.validate();
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        into_result(self.validate())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

fn into_result(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

/// Settings snapshotted by a connection when it starts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Socket receive buffer size, also the largest single read
    pub receive_buffer_size: usize,

    /// Socket send buffer size
    pub send_buffer_size: usize,

    /// Linger on close; `None` leaves the platform default
    #[serde(default, with = "option_duration_serde")]
    pub linger: Option<Duration>,

    /// Disable Nagle's algorithm
    pub no_delay: bool,

    /// Fail the connection when no bytes arrive within this window
    #[serde(default, with = "option_duration_serde")]
    pub receive_timeout: Option<Duration>,

    /// Timeout for outbound TCP connects
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for the TLS handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Transport-level keep-alive, used only when the application-layer one is off
    #[serde(default = "default_tcp_keepalive", with = "option_duration_serde")]
    pub tcp_keepalive: Option<Duration>,

    /// Application-layer keep-alive
    #[serde(default)]
    pub keepalive: KeepAliveConfig,

    /// Transport encryption
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_tcp_keepalive() -> Option<Duration> {
    Some(timeout::TCP_KEEPALIVE_TIME)
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            linger: None,
            no_delay: true,
            receive_timeout: None,
            connect_timeout: timeout::CONNECT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            tcp_keepalive: default_tcp_keepalive(),
            keepalive: KeepAliveConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, size) in [
            ("Receive", self.receive_buffer_size),
            ("Send", self.send_buffer_size),
        ] {
            if size == 0 {
                errors.push(format!("{name} buffer size must be greater than 0"));
            } else if size > MAX_BUFFER_SIZE {
                errors.push(format!(
                    "{name} buffer size too large: {size} bytes (maximum: 16 MB)"
                ));
            }
        }

        if let Some(receive_timeout) = self.receive_timeout {
            if receive_timeout.is_zero() {
                errors.push("Receive timeout must be greater than 0 when set".to_string());
            }
        }

        if self.connect_timeout.as_millis() < 10 {
            errors.push("Connect timeout too short (minimum: 10ms)".to_string());
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        }

        if let Some(tcp_keepalive) = self.tcp_keepalive {
            if tcp_keepalive.as_secs() < 1 {
                errors.push("TCP keep-alive time too short (minimum: 1s)".to_string());
            }
        }

        errors.extend(self.keepalive.validate());
        errors.extend(self.tls.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        into_result(self.validate())
    }

    /// Enable the application-layer keep-alive with the given interval
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = KeepAliveConfig {
            enabled: true,
            interval,
        };
        self
    }

    /// Disable the application-layer keep-alive
    pub fn without_keepalive(mut self) -> Self {
        self.keepalive.enabled = false;
        self
    }

    /// Set the receive timeout
    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = Some(receive_timeout);
        self
    }

    /// Replace the TLS settings
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }
}

/// Application-layer keep-alive settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeepAliveConfig {
    /// Send keep-alive units from this side
    pub enabled: bool,

    /// Idle time on the send side before a keep-alive unit goes out
    #[serde(with = "duration_serde")]
    pub interval: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: timeout::KEEPALIVE_INTERVAL,
        }
    }
}

impl KeepAliveConfig {
    /// Validate keep-alive configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.enabled {
            if self.interval.as_millis() < 10 {
                errors.push("Keep-alive interval too short (minimum: 10ms)".to_string());
            } else if self.interval.as_secs() > 3600 {
                errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
            }
        }

        errors
    }
}

/// Transport encryption settings
///
/// The server role needs `cert_path` and `key_path`; the client role needs
/// `server_name` and trusts `ca_path` (PEM) or, when absent, the platform roots.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TlsConfig {
    /// Wrap the transport in TLS
    pub enabled: bool,

    /// PEM certificate chain presented by the server role
    #[serde(default)]
    pub cert_path: Option<String>,

    /// PEM PKCS#8 private key for `cert_path`
    #[serde(default)]
    pub key_path: Option<String>,

    /// Name the client role expects in the server certificate
    #[serde(default)]
    pub server_name: Option<String>,

    /// PEM roots trusted by the client role
    #[serde(default)]
    pub ca_path: Option<String>,
}

impl TlsConfig {
    /// Server-side settings presenting the given certificate and key
    pub fn server<S: Into<String>>(cert_path: S, key_path: S) -> Self {
        Self {
            enabled: true,
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            ..Self::default()
        }
    }

    /// Client-side settings expecting `server_name`
    pub fn client<S: Into<String>>(server_name: S) -> Self {
        Self {
            enabled: true,
            server_name: Some(server_name.into()),
            ..Self::default()
        }
    }

    /// Trust the PEM roots at `ca_path` instead of the platform roots
    pub fn with_ca<S: Into<String>>(mut self, ca_path: S) -> Self {
        self.ca_path = Some(ca_path.into());
        self
    }

    /// Validate TLS configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.enabled {
            return errors;
        }

        if self.cert_path.is_some() != self.key_path.is_some() {
            errors.push("TLS cert_path and key_path must be set together".to_string());
        }

        if self.cert_path.is_none() && self.server_name.is_none() {
            errors.push(
                "TLS enabled but neither a certificate (server) nor a server_name (client) is set"
                    .to_string(),
            );
        }

        if let Some(ref ca) = self.ca_path {
            if !Path::new(ca).exists() {
                errors.push(format!("TLS CA file does not exist: {ca}"));
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Extra `tracing` filter directives, e.g. `opwire=trace`
    #[serde(default)]
    pub filter: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("opwire"),
            log_level: Level::INFO,
            filter: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Optional durations, in milliseconds
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

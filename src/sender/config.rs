//! Configuration consumed when constructing a [`FluentSender`].
//!
//! Hosts hand the binding registry a JSON value shaped like
//! `{host, port, timeout, reconnectInterval}`; [`FluentSenderConfig`]
//! deserialises that shape (camelCase keys) and validates it before a
//! sender is built from it. The config is immutable once the sender exists.
//!
//! [`FluentSender`]: super::FluentSender

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::connection::{SocketTransport, TcpTransport, TlsOptions, UnixTransport};

/// Default collector host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default collector port.
pub const DEFAULT_PORT: u16 = 24224;
/// Default connect/write timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 3.0;
/// Default delay between reconnect attempts in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 600_000;
/// Default routing tag attached to emitted events.
pub const DEFAULT_TAG: &str = "LoopBack";
/// Default bounded queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default maximum encoded frame size (in bytes) accepted by the worker.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1 << 20; // 1 MiB

// Hard ceilings on the tunables; validate() rejects anything beyond them so
// the duration and queue-allocation arithmetic downstream stays in range.
const MAX_TIMEOUT_SECS: f64 = 86_400.0;
const MAX_RECONNECT_INTERVAL_MS: u64 = 86_400_000;
const MAX_QUEUE_CAPACITY: usize = 1 << 20;
const MAX_FRAME_SIZE_BYTES: usize = 1 << 28;

/// Errors detected while parsing or validating a sender configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration value did not match the expected shape.
    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
    #[error("{field} must be at most {max}")]
    TooLarge { field: &'static str, max: u64 },
    #[error("host must not be empty")]
    EmptyHost,
    #[error("tag must not be empty")]
    EmptyTag,
    #[error("timeout must be greater than zero and at most 86400 seconds")]
    InvalidTimeout,
    #[error("tls is only supported for tcp transports")]
    TlsRequiresTcp,
}

/// TLS settings for the collector connection.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsSettings {
    /// Domain presented during the handshake; defaults to the configured
    /// host.
    pub domain: Option<String>,
    /// Skip certificate validation when true (intended for tests).
    pub insecure_skip_verify: bool,
}

/// Configuration describing how to construct a [`FluentSender`].
///
/// [`FluentSender`]: super::FluentSender
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FluentSenderConfig {
    /// Hostname or IP address of the collector.
    pub host: String,
    /// TCP port the collector listens on.
    pub port: u16,
    /// Connect and write timeout in seconds; also bounds the closing flush.
    pub timeout: f64,
    /// Delay between reconnect attempts in milliseconds.
    pub reconnect_interval: u64,
    /// Routing tag attached to every event.
    pub tag: String,
    /// Bounded queue capacity; the newest emission displaces the oldest
    /// when full.
    pub capacity: usize,
    /// Maximum encoded frame size in bytes.
    pub max_frame_size: usize,
    /// Unix domain socket path; takes precedence over host/port when set.
    pub path: Option<PathBuf>,
    /// Optional TLS settings for the collector connection.
    pub tls: Option<TlsSettings>,
}

/// Defaults match the reference client's, so a `{}` configuration targets
/// a local collector.
impl Default for FluentSenderConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT_SECS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL_MS,
            tag: DEFAULT_TAG.to_owned(),
            capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            path: None,
            tls: None,
        }
    }
}

impl FluentSenderConfig {
    /// Configuration targeting `host:port` with default tuning.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Deserialise a configuration from a JSON value.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Override the routing tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Override the connect/write timeout in seconds.
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Override the reconnect interval in milliseconds.
    pub fn with_reconnect_interval(mut self, millis: u64) -> Self {
        self.reconnect_interval = millis;
        self
    }

    /// Override the queue capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Override the maximum encoded frame size.
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Target a Unix domain socket instead of host/port.
    pub fn with_unix_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Enable TLS for the collector connection.
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Check the invariants a sender relies on, ceilings included.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.timeout.is_finite() || self.timeout <= 0.0 || self.timeout > MAX_TIMEOUT_SECS {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.reconnect_interval > MAX_RECONNECT_INTERVAL_MS {
            return Err(ConfigError::TooLarge {
                field: "reconnectInterval",
                max: MAX_RECONNECT_INTERVAL_MS,
            });
        }
        if self.capacity == 0 {
            return Err(ConfigError::NotPositive { field: "capacity" });
        }
        if self.capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::TooLarge {
                field: "capacity",
                max: MAX_QUEUE_CAPACITY as u64,
            });
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "maxFrameSize",
            });
        }
        if self.max_frame_size > MAX_FRAME_SIZE_BYTES {
            return Err(ConfigError::TooLarge {
                field: "maxFrameSize",
                max: MAX_FRAME_SIZE_BYTES as u64,
            });
        }
        if self.tag.is_empty() {
            return Err(ConfigError::EmptyTag);
        }
        if self.path.is_some() {
            if self.tls.is_some() {
                return Err(ConfigError::TlsRequiresTcp);
            }
            return Ok(());
        }
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::NotPositive { field: "port" });
        }
        Ok(())
    }

    /// The configured timeout as a [`Duration`]. Valid only after
    /// [`validate`](Self::validate) has passed.
    pub(crate) fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// The configured reconnect interval as a [`Duration`].
    pub(crate) fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }

    /// Build the transport definition the connection manager dials.
    pub(crate) fn transport(&self) -> SocketTransport {
        if let Some(path) = &self.path {
            return SocketTransport::Unix(UnixTransport { path: path.clone() });
        }
        let tls = self.tls.as_ref().map(|settings| TlsOptions {
            domain: settings
                .domain
                .clone()
                .unwrap_or_else(|| self.host.clone()),
            insecure_skip_verify: settings.insecure_skip_verify,
        });
        SocketTransport::Tcp(TcpTransport {
            host: self.host.clone(),
            port: self.port,
            tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn parses_the_host_config_shape() {
        let value = json!({
            "host": "127.0.0.1",
            "port": 24224,
            "timeout": 3.0,
            "reconnectInterval": 600000,
        });
        let config = FluentSenderConfig::from_value(&value).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 24224);
        assert_eq!(config.timeout, 3.0);
        assert_eq!(config.reconnect_interval, 600_000);
        assert_eq!(config.tag, DEFAULT_TAG);
        assert_eq!(config.capacity, DEFAULT_QUEUE_CAPACITY);
        config.validate().unwrap();
    }

    #[test]
    fn empty_config_uses_reference_defaults() {
        let config = FluentSenderConfig::from_value(&json!({})).unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.reconnect_interval, DEFAULT_RECONNECT_INTERVAL_MS);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_misshapen_values() {
        let err = FluentSenderConfig::from_value(&json!({"port": "abc"})).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[rstest]
    #[case::zero_port(FluentSenderConfig::new("localhost", 0))]
    #[case::empty_host(FluentSenderConfig::new("", 24224))]
    #[case::zero_capacity(FluentSenderConfig::new("localhost", 24224).with_capacity(0))]
    #[case::zero_frame(FluentSenderConfig::new("localhost", 24224).with_max_frame_size(0))]
    #[case::nan_timeout(FluentSenderConfig::new("localhost", 24224).with_timeout(f64::NAN))]
    #[case::negative_timeout(FluentSenderConfig::new("localhost", 24224).with_timeout(-1.0))]
    #[case::huge_timeout(FluentSenderConfig::new("localhost", 24224).with_timeout(2.0e19))]
    #[case::huge_reconnect(FluentSenderConfig::new("localhost", 24224).with_reconnect_interval(u64::MAX))]
    #[case::huge_capacity(FluentSenderConfig::new("localhost", 24224).with_capacity(usize::MAX))]
    #[case::huge_frame(FluentSenderConfig::new("localhost", 24224).with_max_frame_size(usize::MAX))]
    #[case::empty_tag(FluentSenderConfig::new("localhost", 24224).with_tag(""))]
    fn rejects_invalid_settings(#[case] config: FluentSenderConfig) {
        assert!(config.validate().is_err());
    }

    #[test]
    fn ceilings_are_reported_with_the_limit() {
        let err = FluentSenderConfig::new("localhost", 24224)
            .with_capacity(MAX_QUEUE_CAPACITY + 1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge { field: "capacity", .. }));
        assert_eq!(err.to_string(), "capacity must be at most 1048576");

        let err = FluentSenderConfig::new("localhost", 24224)
            .with_timeout(MAX_TIMEOUT_SECS * 2.0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout));
    }

    #[test]
    fn ceiling_values_themselves_are_accepted() {
        FluentSenderConfig::new("localhost", 24224)
            .with_timeout(MAX_TIMEOUT_SECS)
            .with_reconnect_interval(MAX_RECONNECT_INTERVAL_MS)
            .with_capacity(MAX_QUEUE_CAPACITY)
            .with_max_frame_size(MAX_FRAME_SIZE_BYTES)
            .validate()
            .expect("ceiling values are valid");
    }

    #[test]
    fn tls_is_rejected_for_unix_transports() {
        let config = FluentSenderConfig::new("localhost", 24224)
            .with_unix_path("/tmp/fluent.sock")
            .with_tls(TlsSettings::default());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::TlsRequiresTcp));
    }

    #[test]
    fn tls_domain_defaults_to_the_host() {
        let config = FluentSenderConfig::new("collector.internal", 24224)
            .with_tls(TlsSettings::default());
        let SocketTransport::Tcp(tcp) = config.transport() else {
            panic!("expected tcp transport");
        };
        assert_eq!(tcp.tls.unwrap().domain, "collector.internal");
    }

    #[test]
    fn unix_path_takes_precedence() {
        let config = FluentSenderConfig::new("localhost", 24224).with_unix_path("/run/fluent.sock");
        assert!(matches!(config.transport(), SocketTransport::Unix(_)));
    }
}

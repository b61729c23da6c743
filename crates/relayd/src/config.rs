//! Relay configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields a working configuration:
//!
//! ```toml
//! buffer_size = 1024
//! auth_timeout_secs = 10
//! error_log = "/var/log/relay-errors.jsonl"
//!
//! [tcp]
//! host = "0.0.0.0"
//! port = 5555
//! backlog = 128
//!
//! [udp]
//! host = "0.0.0.0"
//! port = 5556
//! max_in_flight = 64
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use relay_protocol::DEFAULT_BUFFER_SIZE;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "RELAY_CONFIG";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_TCP_PORT: u16 = 5555;
pub const DEFAULT_UDP_PORT: u16 = 5556;
pub const DEFAULT_BACKLOG: u32 = 128;
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Read buffer for one TCP frame or UDP datagram.
    pub buffer_size: usize,

    /// How long a new TCP connection has to send its nickname.
    pub auth_timeout_secs: u64,

    /// Optional JSON-lines file that receives every handled error.
    pub error_log: Option<PathBuf>,

    pub tcp: TcpConfig,
    pub udp: UdpConfig,
}

/// TCP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpConfig {
    /// Bind host (IP literal)
    pub host: String,
    /// Listen port; 0 picks an ephemeral one.
    pub port: u16,
    /// Pending-connection queue length passed to `listen`.
    pub backlog: u32,
}

/// UDP socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdpConfig {
    /// Bind host (IP literal)
    pub host: String,
    /// Listen port; 0 picks an ephemeral one.
    pub port: u16,
    /// Datagrams handled concurrently before the receive loop waits.
    pub max_in_flight: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
            error_log: None,
            tcp: TcpConfig::default(),
            udp: UdpConfig::default(),
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_TCP_PORT,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_UDP_PORT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl RelayConfig {
    /// Loopback configuration on ephemeral ports.
    pub fn loopback() -> Self {
        let host = Ipv4Addr::LOCALHOST.to_string();
        Self {
            tcp: TcpConfig {
                host: host.clone(),
                port: 0,
                ..TcpConfig::default()
            },
            udp: UdpConfig {
                host,
                port: 0,
                ..UdpConfig::default()
            },
            ..Self::default()
        }
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Loads `path` if given, else the file named by `RELAY_CONFIG`, else
    /// the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(env_path) => Self::load(Path::new(&env_path)),
            None => Ok(Self::default()),
        }
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be at least 1".into()));
        }
        if self.auth_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "auth_timeout_secs must be at least 1".into(),
            ));
        }
        if self.tcp.backlog == 0 {
            return Err(ConfigError::Invalid("tcp.backlog must be at least 1".into()));
        }
        if self.udp.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "udp.max_in_flight must be at least 1".into(),
            ));
        }
        self.tcp.bind_addr()?;
        self.udp.bind_addr()?;
        Ok(())
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

impl TcpConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.host, self.port, "tcp.host")
    }
}

impl UdpConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.host, self.port, "udp.host")
    }
}

fn resolve(host: &str, port: u16, field: &str) -> Result<SocketAddr, ConfigError> {
    let ip = if host.eq_ignore_ascii_case("localhost") {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        host.parse::<IpAddr>().map_err(|_| {
            ConfigError::Invalid(format!("{field} must be an IP address, got '{host}'"))
        })?
    };
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.auth_timeout(), Duration::from_secs(10));
        assert_eq!(config.tcp.port, DEFAULT_TCP_PORT);
        assert_eq!(config.udp.port, DEFAULT_UDP_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = RelayConfig::from_toml_str("").unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = RelayConfig::from_toml_str(
            r#"
            buffer_size = 2048

            [udp]
            port = 7000
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.udp.port, 7000);
        assert_eq!(config.udp.host, DEFAULT_HOST);
        assert_eq!(config.tcp, TcpConfig::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = RelayConfig::from_toml_str("bufer_size = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RelayConfig::from_toml_str("buffer_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = RelayConfig::from_toml_str("[udp]\nmax_in_flight = 0").unwrap_err();
        assert!(err.to_string().contains("max_in_flight"));

        let err = RelayConfig::from_toml_str("[tcp]\nhost = \"example.invalid\"").unwrap_err();
        assert!(err.to_string().contains("tcp.host"));
    }

    #[test]
    fn test_localhost_resolves() {
        let config = RelayConfig::from_toml_str("[tcp]\nhost = \"localhost\"\nport = 9").unwrap();
        assert_eq!(
            config.tcp.bind_addr().unwrap(),
            "127.0.0.1:9".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "auth_timeout_secs = 3\n[tcp]\nport = 6000").unwrap();

        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.auth_timeout_secs, 3);
        assert_eq!(config.tcp.port, 6000);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RelayConfig::load(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/relay.toml"));
    }

    #[test]
    fn test_loopback_uses_ephemeral_ports() {
        let config = RelayConfig::loopback();
        assert_eq!(config.tcp.bind_addr().unwrap().port(), 0);
        assert!(config.udp.bind_addr().unwrap().ip().is_loopback());
    }
}

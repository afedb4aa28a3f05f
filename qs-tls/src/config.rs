//! Configuration for qs-tls endpoints

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{QsTlsError, Result};
use crate::keys::DEFAULT_KEY_PATH;

/// Default listen/connect host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen/connect port
pub const DEFAULT_PORT: u16 = 50506;

/// Configuration for a qs-tls server or client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QsTlsConfig {
    /// Host to bind (server) or connect to (client)
    pub host: String,

    /// TCP port
    pub port: u16,

    /// File holding the pre-shared secret
    pub key_path: PathBuf,

    /// Whether to log detailed handshake information
    pub verbose_logging: bool,
}

impl Default for QsTlsConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl QsTlsConfig {
    /// Create a new configuration using the default key file
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
            verbose_logging: false,
        }
    }

    /// Loopback configuration on an OS-assigned port with verbose logging
    pub fn development() -> Self {
        Self::new(DEFAULT_HOST, 0).with_verbose_logging()
    }

    /// Set the pre-shared secret file
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = path.into();
        self
    }

    /// Enable verbose logging
    pub fn with_verbose_logging(mut self) -> Self {
        self.verbose_logging = true;
        self
    }

    /// `host:port` as a string suitable for `TcpListener::bind`/`TcpStream::connect`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse the endpoint as a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.endpoint().parse().map_err(|e| {
            QsTlsError::InvalidConfig(format!("bad address {}: {}", self.endpoint(), e))
        })
    }
}

/// Builder for QsTlsConfig
pub struct QsTlsConfigBuilder {
    host: String,
    port: u16,
    key_path: PathBuf,
    verbose_logging: bool,
}

impl Default for QsTlsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QsTlsConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
            verbose_logging: false,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the pre-shared secret file
    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = path.into();
        self
    }

    /// Enable verbose logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<QsTlsConfig> {
        if self.host.trim().is_empty() {
            return Err(QsTlsError::InvalidConfig("host is required".to_string()));
        }
        if self.key_path.as_os_str().is_empty() {
            return Err(QsTlsError::InvalidConfig("key path is required".to_string()));
        }

        Ok(QsTlsConfig {
            host: self.host,
            port: self.port,
            key_path: self.key_path,
            verbose_logging: self.verbose_logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = QsTlsConfig::default();
        assert_eq!(config.endpoint(), "127.0.0.1:50506");
        assert_eq!(config.key_path, PathBuf::from("final_key.bin"));
        assert!(!config.verbose_logging);
        assert_eq!(
            config.socket_addr().unwrap(),
            "127.0.0.1:50506".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn builder_overrides() {
        let config = QsTlsConfigBuilder::new()
            .host("0.0.0.0")
            .port(9000)
            .key_path("/tmp/psk.bin")
            .verbose(true)
            .build()
            .unwrap();
        assert_eq!(config.endpoint(), "0.0.0.0:9000");
        assert_eq!(config.key_path, PathBuf::from("/tmp/psk.bin"));
        assert!(config.verbose_logging);
    }

    #[test]
    fn builder_rejects_empty_host() {
        assert!(matches!(
            QsTlsConfigBuilder::new().host(" ").build(),
            Err(QsTlsError::InvalidConfig(_))
        ));
        assert!(matches!(
            QsTlsConfigBuilder::new().key_path("").build(),
            Err(QsTlsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn hostname_endpoint_is_not_a_socket_addr() {
        let config = QsTlsConfig::new("localhost", 1);
        assert_eq!(config.endpoint(), "localhost:1");
        assert!(matches!(
            config.socket_addr(),
            Err(QsTlsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: QsTlsConfig = serde_json::from_str(r#"{"port": 6000}"#).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.key_path, PathBuf::from(DEFAULT_KEY_PATH));
    }
}

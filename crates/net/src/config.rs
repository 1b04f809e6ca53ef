//! Server and client settings
//!
//! Both structs deserialize from TOML/serde with every field optional.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::frame::DEFAULT_MAX_BODY_SIZE;
use crate::DEFAULT_PORT;

/// Default time allowed for the validation handshake
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5000;

/// Listening server settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub bind_addr: IpAddr,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Largest body a peer may announce
    pub max_body_size: u32,
    /// Require the challenge-response handshake before accepting traffic
    pub handshake: bool,
    pub handshake_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            handshake: true,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    /// Default settings on a specific port
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Outbound client settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub max_body_size: u32,
    /// Answer the server's validation challenge after connecting
    pub handshake: bool,
    pub handshake_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            handshake: true,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.handshake);
        assert_eq!(config.socket_addr().to_string(), format!("0.0.0.0:{DEFAULT_PORT}"));
    }

    #[test]
    fn test_partial_toml() {
        let config: ServerConfig = toml::from_str(
            r#"
            bind_addr = "127.0.0.1"
            port = 4100
            handshake = false
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:4100");
        assert!(!config.handshake);
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_client_config_from_toml() {
        let config: ClientConfig = toml::from_str("handshake_timeout_ms = 250").unwrap();
        assert!(config.handshake);
        assert_eq!(config.handshake_timeout(), Duration::from_millis(250));
    }
}

//! Listener configuration
//!
//! SpotX exposes two listeners: the HTTP order API and the WebSocket
//! distribution endpoint.

use crate::error::{Result, ServerError};
use std::net::SocketAddr;

/// Default port assignments
pub mod ports {
    /// Order API (HTTP)
    pub const HTTP: u16 = 8080;
    /// Distribution server (WebSocket)
    pub const WS: u16 = 7080;
}

/// Bind configuration for the HTTP and WebSocket listeners
///
/// Each port is optional so a process can serve only one surface.
///
/// # Example
///
/// ```
/// use server::config::ServerConfig;
///
/// let both = ServerConfig::new("0.0.0.0", 8080, 7080);
/// let ws = ServerConfig::websocket_only("127.0.0.1", 7080);
/// assert!(ws.http_port.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    pub http_port: Option<u16>,
    pub websocket_port: Option<u16>,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, http: u16, ws: u16) -> Self {
        Self {
            host: host.into(),
            http_port: Some(http),
            websocket_port: Some(ws),
        }
    }

    pub fn http_only(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            http_port: Some(port),
            websocket_port: None,
        }
    }

    pub fn websocket_only(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            http_port: None,
            websocket_port: Some(port),
        }
    }

    /// Build from the `server` section of the master config
    pub fn from_listen(listen: &::config::ListenConfig) -> Self {
        Self::new(listen.host.clone(), listen.http_port, listen.ws_port)
    }

    pub fn http_addr(&self) -> Option<Result<SocketAddr>> {
        self.http_port.map(|p| self.parse_addr(p))
    }

    pub fn websocket_addr(&self) -> Option<Result<SocketAddr>> {
        self.websocket_port.map(|p| self.parse_addr(p))
    }

    /// Check if any listener is configured
    pub fn has_servers(&self) -> bool {
        self.http_port.is_some() || self.websocket_port.is_some()
    }

    fn parse_addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, port)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", ports::HTTP, ports::WS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_new() {
        let config = ServerConfig::new("127.0.0.1", 8080, 7080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.http_port, Some(8080));
        assert_eq!(config.websocket_port, Some(7080));
        assert!(config.has_servers());
    }

    #[test]
    fn test_single_listener() {
        let config = ServerConfig::http_only("127.0.0.1", 8080);
        assert_eq!(config.websocket_port, None);
        assert!(config.websocket_addr().is_none());

        let config = ServerConfig::websocket_only("127.0.0.1", 7080);
        assert_eq!(config.websocket_addr().unwrap().unwrap().port(), 7080);
    }

    #[test]
    fn test_from_listen() {
        let listen = ::config::ListenConfig {
            host: "127.0.0.1".into(),
            http_port: 18080,
            ws_port: 17080,
        };
        let config = ServerConfig::from_listen(&listen);
        assert_eq!(config.http_port, Some(18080));
        assert_eq!(config.websocket_port, Some(17080));
    }

    #[test]
    fn test_invalid_host() {
        let config = ServerConfig::http_only("not a host", 8080);
        assert!(matches!(config.http_addr(), Some(Err(ServerError::InvalidAddress(_)))));
    }
}

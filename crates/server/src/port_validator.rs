//! Port checks run before startup
//!
//! A free port can still be taken between the check and the real bind; the
//! bind itself is authoritative. These checks only give earlier feedback.

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

fn configured_ports(config: &ServerConfig) -> Vec<(&'static str, u16)> {
    let mut ports = Vec::with_capacity(2);
    if let Some(port) = config.http_port {
        ports.push(("HTTP", port));
    }
    if let Some(port) = config.websocket_port {
        ports.push(("WebSocket", port));
    }
    ports
}

/// Check that every configured port can be bound right now
pub async fn validate_ports_available(config: &ServerConfig) -> Result<()> {
    let ports = configured_ports(config);
    if ports.is_empty() {
        warn!("No ports configured for server");
        return Ok(());
    }

    for (protocol, port) in ports {
        validate_single_port(&config.host, port, protocol).await?;
    }

    info!("All server ports validated successfully");
    Ok(())
}

async fn validate_single_port(host: &str, port: u16, protocol: &str) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    debug!(protocol, port, "Checking port");

    match TcpListener::bind(&addr).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) => {
            error!(protocol, port, %e, "Port is not available");
            Err(ServerError::port_in_use(port, e.to_string()))
        }
    }
}

/// Reject port 0 and warn about privileged ports
pub fn validate_port_range(port: u16) -> Result<()> {
    if port == 0 {
        return Err(ServerError::ConfigError("Port cannot be 0".to_string()));
    }
    if port < 1024 {
        warn!(port, "Privileged port requires elevated permissions");
    }
    Ok(())
}

/// Static checks of a listener configuration
pub fn validate_config_ports(config: &ServerConfig) -> Result<()> {
    let ports = configured_ports(config);
    for (_, port) in &ports {
        validate_port_range(*port)?;
    }
    if let [(_, a), (_, b)] = ports.as_slice() {
        if a == b {
            return Err(ServerError::ConfigError(format!(
                "HTTP and WebSocket listeners share port {}",
                a
            )));
        }
    }
    Ok(())
}

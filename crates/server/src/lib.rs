//! Server infrastructure for SpotX
//!
//! Runs the HTTP order API and the WebSocket distribution server under one
//! lifecycle.
//!
// tungstenite errors are large; they only surface at connection setup
#![allow(clippy::result_large_err)]
//!
//! # Architecture
//!
//! All listeners implement [`Server`]. Shutdown is a tree of
//! `CancellationToken`s rooted in a [`ShutdownController`]: the combined
//! server hands each listener a child token, and the distribution server
//! hands one to each connection and to the hub's background tasks.
//!
//! # Modules
//!
//! - [`config`] - listener configuration and default ports
//! - [`traits`] - `Server` and `ServerExt`
//! - [`http`] - HTTP server using Axum
//! - [`websocket`] - WebSocket transport for the distribution hub
//! - [`distribution`] - channels, protocol, auth, subscriptions and fan-out
//! - [`shutdown`] - signal handling

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod config;
pub mod distribution;
pub mod error;
pub mod http;
pub mod port_validator;
pub mod shutdown;
pub mod traits;
pub mod websocket;

pub use crate::config::{ports, ServerConfig};
pub use distribution::{Channel, DistributionError, DistributionHub};
pub use error::{Result, ServerError};
pub use http::HttpServer;
pub use port_validator::{validate_config_ports, validate_ports_available};
pub use shutdown::{shutdown_signal, ShutdownController};
pub use traits::{Server, ServerExt};
pub use websocket::WebSocketServer;

/// Time allowed for every listener to stop after shutdown
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// HTTP API and distribution server run as one unit
///
/// ```ignore
/// let server = CombinedServer::new(ServerConfig::from_listen(&master.server), router, hub);
/// server.run_with_shutdown_signal().await?;
/// ```
pub struct CombinedServer {
    name: String,
    config: ServerConfig,
    http_server: Option<HttpServer>,
    ws_server: Option<WebSocketServer>,
}

impl CombinedServer {
    /// Servers for every configured port
    pub fn new(config: ServerConfig, http_router: axum::Router, hub: Arc<DistributionHub>) -> Self {
        let http_server = config
            .http_port
            .map(|_| HttpServer::new(config.clone(), http_router));
        let ws_server = config
            .websocket_port
            .map(|_| WebSocketServer::new(config.clone(), hub));

        Self {
            name: "spotx".into(),
            config,
            http_server,
            ws_server,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn http_address(&self) -> Option<std::net::SocketAddr> {
        self.http_server.as_ref().and_then(|s| s.address())
    }

    pub fn websocket_address(&self) -> Option<std::net::SocketAddr> {
        self.ws_server.as_ref().and_then(|s| s.address())
    }

    /// Check that all configured ports are free
    pub async fn validate_ports(&self) -> Result<()> {
        validate_ports_available(&self.config).await
    }
}

#[async_trait::async_trait]
impl Server for CombinedServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> Option<std::net::SocketAddr> {
        self.http_address().or_else(|| self.websocket_address())
    }

    fn is_running(&self) -> bool {
        self.http_server.as_ref().is_some_and(|s| s.is_running())
            || self.ws_server.as_ref().is_some_and(|s| s.is_running())
    }

    async fn run(&self, shutdown_token: CancellationToken) -> Result<()> {
        info!(server = %self.name, "Starting combined server...");

        let mut handles: Vec<tokio::task::JoinHandle<Result<()>>> = Vec::new();

        if let Some(ref http) = self.http_server {
            let http = http.clone();
            let token = shutdown_token.child_token();
            handles.push(tokio::spawn(async move { http.run(token).await }));
        }

        if let Some(ref ws) = self.ws_server {
            let ws = ws.clone();
            let token = shutdown_token.child_token();
            handles.push(tokio::spawn(async move { ws.run(token).await }));
        }

        if handles.is_empty() {
            warn!("No servers configured to start");
            return Ok(());
        }

        // Stop on shutdown, or as soon as one listener exits on its own
        let mut failure = None;
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                info!("Shutdown signal received");
            }
            result = wait_for_first_completion(&mut handles) => {
                match result {
                    Some(Ok(Ok(()))) => warn!("A server exited unexpectedly (but successfully)"),
                    Some(Ok(Err(e))) => {
                        error!(%e, "A server exited with error");
                        failure = Some(e);
                    }
                    Some(Err(e)) => error!(%e, "A server task panicked"),
                    None => {}
                }
                shutdown_token.cancel();
            }
        }

        info!("Waiting for all servers to shut down...");
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(handles)).await {
            Ok(results) => {
                let errors: Vec<_> = results
                    .into_iter()
                    .filter_map(|r| match r {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(e) => Some(format!("Task panicked: {}", e)),
                    })
                    .collect();

                if errors.is_empty() {
                    info!(server = %self.name, "All servers shut down successfully");
                } else {
                    warn!(?errors, "Some servers had errors during shutdown");
                }
            }
            Err(_) => warn!("Timed out waiting for servers to shut down"),
        }

        info!(server = %self.name, "Combined server shutdown complete");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn wait_for_first_completion(
    handles: &mut [tokio::task::JoinHandle<Result<()>>],
) -> Option<std::result::Result<Result<()>, tokio::task::JoinError>> {
    if handles.is_empty() {
        return None;
    }

    let (result, _index, _remaining) = futures::future::select_all(handles.iter_mut()).await;
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matching_engine::{EngineConfig, Exchange};
    use std::time::Duration;

    async fn parts() -> (axum::Router, Arc<DistributionHub>) {
        let exchange = Exchange::start(EngineConfig::default()).await.unwrap();
        let hub = Arc::new(DistributionHub::new(Arc::clone(&exchange), Default::default()));
        (matching_engine::api::create_router(exchange), hub)
    }

    #[tokio::test]
    async fn test_combined_server_shutdown() {
        let (router, hub) = parts().await;
        let server = CombinedServer::new(ServerConfig::new("127.0.0.1", 0, 0), router, hub);
        let (handle, token) = server.spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))), "Server should shutdown cleanly");
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let (router, hub) = parts().await;
        let server = CombinedServer::new(ServerConfig::new("127.0.0.1", port, 0), router, hub);
        let result = tokio::time::timeout(Duration::from_secs(10), server.run(CancellationToken::new())).await;
        assert!(matches!(result, Ok(Err(ServerError::BindError { .. }))));
    }
}

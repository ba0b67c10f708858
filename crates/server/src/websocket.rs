//! WebSocket transport for the distribution hub
//!
//! Each accepted socket gets two halves: a reader that hands text frames to
//! the [`DistributionHub`] and a writer that drains the connection's
//! outbound queue. Both stop when the connection token is cancelled.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use observability::ServerMetrics;
use parking_lot::RwLock as SyncRwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::distribution::{ConnectionId, DistributionError, DistributionHub, Outbound};
use crate::error::{Result, ServerError};
use crate::traits::Server;

/// Time allowed for open connections to finish after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Distribution server over WebSocket
///
/// # Example
///
/// ```ignore
/// use server::{WebSocketServer, ServerConfig, ServerExt, DistributionHub};
///
/// let hub = Arc::new(DistributionHub::new(exchange, config.distribution.clone()));
/// let server = WebSocketServer::new(ServerConfig::websocket_only("127.0.0.1", 7080), hub);
/// server.run_with_shutdown_signal().await?;
/// ```
#[derive(Clone)]
pub struct WebSocketServer {
    config: ServerConfig,
    hub: Arc<DistributionHub>,
    metrics: ServerMetrics,
    running: Arc<AtomicBool>,
    bound_addr: Arc<SyncRwLock<Option<SocketAddr>>>,
}

impl WebSocketServer {
    pub fn new(config: ServerConfig, hub: Arc<DistributionHub>) -> Self {
        Self {
            config,
            hub,
            metrics: ServerMetrics::new("websocket"),
            running: Arc::new(AtomicBool::new(false)),
            bound_addr: Arc::new(SyncRwLock::new(None)),
        }
    }

    fn bind_addr(&self) -> Result<SocketAddr> {
        self.config
            .websocket_addr()
            .ok_or_else(|| ServerError::ConfigError("WebSocket port not configured".into()))?
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<DistributionHub> {
        &self.hub
    }

    /// Serve one socket until either side closes it
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        server_token: CancellationToken,
    ) -> Result<()> {
        let ws_stream = accept_async(stream).await.map_err(ServerError::WebSocket)?;
        let (sink, source) = ws_stream.split();

        let handle = self.hub.connect(peer_addr, &server_token);
        let conn_id = handle.id;
        let conn_token = handle.cancel.clone();
        self.metrics.connection_opened();

        let writer = tokio::spawn(write_loop(conn_id, sink, handle.outbound, conn_token.clone()));
        self.read_loop(conn_id, source, &conn_token).await;

        // The reader is done; make sure the writer stops too
        conn_token.cancel();
        if let Err(e) = writer.await {
            error!(conn_id, %e, "WebSocket writer task panicked");
        }

        self.hub.disconnect(conn_id);
        self.metrics.connection_closed();
        debug!(conn_id, %peer_addr, "WebSocket connection closed");
        Ok(())
    }

    async fn read_loop(&self, conn_id: ConnectionId, mut source: WsSource, conn_token: &CancellationToken) {
        loop {
            tokio::select! {
                _ = conn_token.cancelled() => break,
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.hub.handle_text(conn_id, &text).await,
                    Some(Ok(Message::Binary(_))) => {
                        self.hub.touch(conn_id);
                        self.hub.reject(
                            conn_id,
                            DistributionError::Protocol("binary frames are not supported".into()),
                        );
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(conn_id, "WebSocket client disconnected gracefully");
                        break;
                    }
                    // Ping, pong and raw frames only prove liveness; tungstenite answers pings
                    Some(Ok(_)) => self.hub.touch(conn_id),
                    Some(Err(e)) => {
                        debug!(conn_id, %e, "WebSocket read error");
                        break;
                    }
                    None => break,
                },
            }
        }
    }
}

/// Drain the outbound queue into the socket
async fn write_loop(
    conn_id: ConnectionId,
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Outbound>,
    conn_token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = conn_token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => frame,
        };

        match frame {
            Some(Outbound::Text(text)) => {
                if let Err(e) = sink.send(Message::Text(text.to_string())).await {
                    debug!(conn_id, %e, "Failed to send WebSocket message");
                    break;
                }
            }
            Some(Outbound::Close { reason }) => {
                let close = CloseFrame {
                    code: CloseCode::Policy,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(close))).await;
                break;
            }
            None => break,
        }
    }
    conn_token.cancel();
}

#[async_trait]
impl Server for WebSocketServer {
    fn name(&self) -> &str {
        "websocket"
    }

    fn address(&self) -> Option<SocketAddr> {
        *self.bound_addr.read()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self, shutdown_token: CancellationToken) -> Result<()> {
        let addr = self.bind_addr()?;

        info!(%addr, "Starting distribution server");

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;

        let local_addr = listener.local_addr().map_err(ServerError::Io)?;
        *self.bound_addr.write() = Some(local_addr);

        info!(%local_addr, "Distribution server listening");

        self.running.store(true, Ordering::SeqCst);

        let background = self.hub.spawn_background(shutdown_token.child_token());
        let mut connection_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    info!("Distribution server received shutdown signal");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(%peer_addr, %e, "Failed to set TCP_NODELAY");
                            }
                            let server = self.clone();
                            let token = shutdown_token.child_token();

                            let handle = tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr, token).await {
                                    debug!(%peer_addr, %e, "WebSocket handshake failed");
                                }
                            });

                            connection_handles.push(handle);
                            connection_handles.retain(|h| !h.is_finished());
                        }
                        Err(e) => {
                            error!(%e, "Failed to accept WebSocket connection");
                        }
                    }
                }
            }
        }

        let connection_count = connection_handles.len();
        if connection_count > 0 {
            info!(connection_count, "Waiting for distribution clients to close...");
            match tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(connection_handles)).await {
                Ok(_) => info!("All distribution clients closed"),
                Err(_) => warn!("Timed out waiting for distribution clients to close"),
            }
        }
        futures::future::join_all(background).await;

        self.running.store(false, Ordering::SeqCst);
        *self.bound_addr.write() = None;

        info!("Distribution server shutdown complete");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ServerExt;
    use matching_engine::{EngineConfig, Exchange};

    async fn hub() -> Arc<DistributionHub> {
        let exchange = Exchange::start(EngineConfig::default()).await.unwrap();
        Arc::new(DistributionHub::new(exchange, Default::default()))
    }

    #[tokio::test]
    async fn test_websocket_server_shutdown() {
        let server = WebSocketServer::new(ServerConfig::websocket_only("127.0.0.1", 0), hub().await);
        let (handle, token) = server.spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "Server should shutdown within timeout");
    }

    #[tokio::test]
    async fn test_requires_websocket_port() {
        let server = WebSocketServer::new(ServerConfig::http_only("127.0.0.1", 0), hub().await);
        assert_eq!(server.name(), "websocket");
        let result = server.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::ConfigError(_))));
    }
}

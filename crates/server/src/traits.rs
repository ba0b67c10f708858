//! Server lifecycle traits
//!
//! Every listener implements [`Server`]; [`ServerExt`] adds spawning and
//! signal-driven runs on top.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A listener with a cancellable run loop
///
/// # Implementors
///
/// - [`HttpServer`](crate::http::HttpServer) - order API on Axum
/// - [`WebSocketServer`](crate::websocket::WebSocketServer) - distribution server
/// - [`CombinedServer`](crate::CombinedServer) - both of the above
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Bound address, once listening
    fn address(&self) -> Option<SocketAddr>;

    fn is_running(&self) -> bool;

    /// Bind, serve until `shutdown` is cancelled, then drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be configured or bound.
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}

pub trait ServerExt: Server + Sized {
    /// Run on a new task; cancel the returned token to stop it
    ///
    /// ```ignore
    /// let (handle, token) = server.spawn();
    /// token.cancel();
    /// handle.await??;
    /// ```
    fn spawn(self) -> (tokio::task::JoinHandle<Result<()>>, CancellationToken) {
        let token = CancellationToken::new();
        let token_clone = token.clone();
        let handle = tokio::spawn(async move { self.run(token_clone).await });
        (handle, token)
    }

    /// Run until Ctrl+C or SIGTERM
    fn run_with_shutdown_signal(self) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            let shutdown = crate::shutdown::ShutdownController::with_signals();
            self.run(shutdown.token()).await
        }
    }
}

impl<T: Server + Sized> ServerExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleServer;

    #[async_trait]
    impl Server for IdleServer {
        fn name(&self) -> &str {
            "idle"
        }

        fn address(&self) -> Option<SocketAddr> {
            None
        }

        fn is_running(&self) -> bool {
            false
        }

        async fn run(&self, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_server_ext_spawn() {
        let (handle, token) = IdleServer.spawn();
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}

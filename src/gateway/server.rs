//! HTTP server hosting the gateway pipeline.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::pipeline::{router, Gateway};
use crate::error::{GatewayError, Result};

/// HTTP server for the gateway.
pub struct GatewayServer {
    /// Address to bind to
    addr: SocketAddr,
    gateway: Arc<Gateway>,
}

impl GatewayServer {
    pub fn new(addr: SocketAddr, gateway: Arc<Gateway>) -> Self {
        Self { addr, gateway }
    }

    /// Start the server with graceful shutdown.
    ///
    /// In-flight requests are drained once `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "Gateway listening");

        axum::serve(listener, router(self.gateway))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GatewayError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorsConfig, UpstreamConfig};
    use crate::proxy::Forwarder;
    use crate::ratelimit::{AdmissionController, PolicyTable};

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let forwarder =
            Forwarder::new(UpstreamConfig::default(), CorsConfig::default(), "/api/").unwrap();
        let admission = AdmissionController::new(PolicyTable::defaults(), None);
        let gateway = Arc::new(Gateway::new(admission, forwarder, "/api/"));

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = GatewayServer::new(addr, gateway);

        server.serve_with_shutdown(async {}).await.unwrap();
    }
}

//! HTTP server implementation.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::handler::{admit, health, AppState};
use crate::error::{GatehouseError, Result};
use crate::ratelimit::RateLimiter;
use crate::store::RecordStore;

/// Build the admission router.
pub fn router<S: RecordStore + 'static>(limiter: Arc<RateLimiter<S>>, trust_forwarded_headers: bool) -> Router {
    let state = AppState {
        limiter,
        trust_forwarded_headers,
    };

    Router::new()
        .route("/health", get(health))
        .route("/v1/admission", post(admit::<S>))
        .with_state(state)
}

/// HTTP server for the admission service.
pub struct HttpServer<S: RecordStore + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The limiter instance
    limiter: Arc<RateLimiter<S>>,
    trust_forwarded_headers: bool,
}

impl<S: RecordStore + 'static> HttpServer<S> {
    pub fn new(addr: SocketAddr, limiter: Arc<RateLimiter<S>>, trust_forwarded_headers: bool) -> Self {
        Self {
            addr,
            limiter,
            trust_forwarded_headers,
        }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = router(self.limiter, self.trust_forwarded_headers);
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting admission HTTP server");

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GatehouseError::Io(e)
            })
    }
}

//! # HTTP Server
//!
//! Combines the `$batch` and observability routers into one axum server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::batch_routes::{batch_routes, BatchState};
use super::config::HttpServerConfig;
use super::observability_routes::observability_routes;
use crate::config::UnitConfig;
use crate::observability::Event;
use crate::odata::MemoryStore;

/// HTTP server of one unit
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    /// Create a server over `store` configured by `config`
    pub fn with_config(config: Arc<UnitConfig>, store: Arc<MemoryStore>) -> Self {
        let state = Arc::new(BatchState::new(config.clone(), store));
        Self::with_state(state)
    }

    /// Create a server over prepared shared state
    pub fn with_state(state: Arc<BatchState>) -> Self {
        let http = state.config.http.clone();
        let router = Self::build_router(&http, state);
        Self {
            config: http,
            router,
        }
    }

    fn build_router(config: &HttpServerConfig, state: Arc<BatchState>) -> Router {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .merge(observability_routes(state.metrics.clone()))
            .merge(batch_routes(state))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind and serve until the process stops
    pub async fn start(self) -> io::Result<()> {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(event = %Event::Serving, addr = %addr, "accepting $batch requests");
        axum::serve(listener, self.router).await?;

        Ok(())
    }
}

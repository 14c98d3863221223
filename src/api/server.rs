//! API Server
//!
//! Layer stack and lifecycle for the HTTP/WebSocket front of the engine.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::{config::ApiConfig, services::ServiceContainer, shutdown::StopToken};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: ApiConfig,
    services: Arc<ServiceContainer>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, services: Arc<ServiceContainer>) -> Self {
        Self { config, services }
    }

    /// Router with the full middleware stack.
    pub fn app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            services: self.services.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            operator_key: self.config.operator_key.clone(),
        });

        create_router(state)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error + Send + Sync>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    /// Serve until the stop token fires.
    pub async fn run(self, mut stop: StopToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.app();
        let addr = self.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(
            listen = %addr,
            cors = ?self.config.allowed_origins,
            timeout_secs = self.config.request_timeout_secs,
            operator_key = self.config.operator_key.is_some(),
            "API server running"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.stopped().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

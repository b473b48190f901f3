//! API Server
//!
//! Server setup and middleware stack for the cashier API.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    monitoring::MetricsRegistry,
    routes::create_router,
};
use crate::withdrawal::WithdrawalEngine;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub node_id: String,
    pub network: String,
    pub version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            node_id: "cashier-node-1".to_string(),
            network: "testnet".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Cashier API server
pub struct ApiServer {
    config: ApiConfig,
    engine: WithdrawalEngine,
}

impl ApiServer {
    pub fn new(config: ApiConfig, engine: WithdrawalEngine) -> Self {
        Self { config, engine }
    }

    /// Start the API server
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_app();
        let addr = self.get_socket_addr()?;

        info!("Starting Cashier API Server");
        info!("   Listen: http://{}", addr);
        self.log_server_info();

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API Server stopped gracefully");
        Ok(())
    }

    /// Create the application with the middleware stack
    fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            engine: self.engine.clone(),
            node_id: self.config.node_id.clone(),
            network: self.config.network.clone(),
            version: self.config.version.clone(),
            metrics: Arc::new(MetricsRegistry::new()),
        });

        create_router(state)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))

            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))

            // Timeout layer
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))

            // Tracing layer (last for complete request tracing)
            .layer(TraceLayer::new_for_http())
    }

    /// Get socket address from config
    fn get_socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    /// Log server information
    fn log_server_info(&self) {
        info!("Server Configuration:");
        info!("   Network: {}", self.config.network);
        info!("   Version: {}", self.config.version);
        info!("   Node ID: {}", self.config.node_id);
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);

        info!("Available endpoints:");
        info!("   GET  /health                               - Health check");
        info!("   POST /withdrawals                          - Request a withdrawal");
        info!("   GET  /withdrawals/:id?session_id=          - Poll withdrawal status");
        info!("   GET  /sessions/:id                         - Session account view");
        info!("   POST /admin/withdrawals/:id/approve        - Approve (X-API-Key)");
        info!("   POST /admin/withdrawals/:id/reject         - Reject (X-API-Key)");
        info!("   POST /admin/withdrawals/:id/requeue        - Requeue (X-API-Key)");
        info!("   POST /admin/withdrawals/approve-bulk       - Bulk approve (X-API-Key)");
        info!("   POST /admin/withdrawals/reject-bulk        - Bulk reject (X-API-Key)");
        info!("   GET  /admin/withdrawals/pending-approval   - Approval queue (X-API-Key)");
        info!("   POST /admin/reconcile                      - Reconciliation sweep (X-API-Key)");
        info!("   POST /admin/sessions/:id/credit            - Credit a session (X-API-Key)");
        info!("   GET  /metrics                              - Prometheus metrics");
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{admin::*, handlers::*, monitoring::metrics_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check (high priority)
        .route("/health", get(health_handler))

        // Status endpoint (node info + settlement reachability)
        .route("/status", get(status_handler))

        // Public withdrawal surface
        .route("/withdrawals", post(withdraw_handler))
        .route("/withdrawals/:id", get(withdrawal_status_handler))
        .route("/sessions/:id", get(session_handler))

        // Operator surface (X-API-Key)
        .route("/admin/withdrawals/:id/approve", post(approve_handler))
        .route("/admin/withdrawals/:id/reject", post(reject_handler))
        .route("/admin/withdrawals/:id/requeue", post(requeue_handler))
        .route("/admin/withdrawals/approve-bulk", post(approve_bulk_handler))
        .route("/admin/withdrawals/reject-bulk", post(reject_bulk_handler))
        .route(
            "/admin/withdrawals/pending-approval",
            get(pending_approval_handler),
        )
        .route("/admin/reconcile", post(reconcile_handler))
        .route("/admin/sessions/:id/credit", post(credit_handler))

        // Metrics endpoint for Prometheus
        .route("/metrics", get(metrics_handler))

        // Attach shared state
        .with_state(state)
}

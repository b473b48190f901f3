//! Request Handlers
//!
//! Public surface: withdraw, status (which drives the poller), session view,
//! health.

use super::{
    errors::ApiError,
    middleware::RequestId,
    models::*,
    monitoring::MetricsRegistry,
};
use crate::withdrawal::handler::WithdrawRequest;
use crate::withdrawal::types::WithdrawalStatus;
use crate::withdrawal::WithdrawalEngine;
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub engine: WithdrawalEngine,
    pub node_id: String,
    pub network: String,
    pub version: String,
    pub metrics: Arc<MetricsRegistry>,
}

/// Health check handler - minimal response time
/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
    })
}

/// Status handler: node identity plus settlement reachability
/// GET /status
pub async fn status_handler(
    Extension(_request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Json<StatusResponse> {
    state.metrics.record_request();

    let settlement = match state.engine.settlement_status().await {
        Ok(status) => SettlementInfo {
            reachable: true,
            connected: status.connected,
            synced: status.synced,
        },
        Err(_) => SettlementInfo {
            reachable: false,
            connected: false,
            synced: false,
        },
    };

    Json(StatusResponse {
        node_info: NodeInfo {
            id: state.node_id.clone(),
            network: state.network.clone(),
            version: state.version.clone(),
        },
        settlement,
    })
}

/// Withdraw handler
/// POST /withdrawals
pub async fn withdraw_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<WithdrawBody>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    state.metrics.record_request();

    if body.idempotency_key.trim().is_empty() {
        return Err(ApiError::bad_request(
            request_id.0,
            "idempotency_key must not be empty".to_string(),
        ));
    }

    let request = WithdrawRequest {
        session_id: body.session_id,
        amount: body.amount,
        idempotency_key: body.idempotency_key,
    };

    let tx = state
        .engine
        .request_withdrawal(request)
        .await
        .map_err(|e| {
            state.metrics.record_error();
            ApiError::from_cashier(request_id.0.clone(), e)
        })?;

    state
        .metrics
        .withdrawals_requested_total
        .fetch_add(1, Ordering::SeqCst);
    if tx.status == WithdrawalStatus::Confirmed {
        state
            .metrics
            .withdrawals_confirmed_total
            .fetch_add(1, Ordering::SeqCst);
    }

    Ok(Json(WithdrawResponse {
        transaction: tx.into(),
    }))
}

/// Status handler; advances the transaction's state machine on demand
/// GET /withdrawals/:id?session_id={sid}
pub async fn withdrawal_status_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<WithdrawalStatusResponse>, ApiError> {
    state.metrics.record_request();

    let before = state
        .engine
        .get_transaction(&transaction_id)
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    // Transactions are only visible to their own session.
    if before.session_id != query.session_id {
        return Err(ApiError::not_found(
            request_id.0,
            format!("withdrawal {} not found", transaction_id),
        ));
    }

    let outcome = state
        .engine
        .poll_transaction(&transaction_id)
        .await
        .map_err(|e| {
            state.metrics.record_error();
            ApiError::from_cashier(request_id.0.clone(), e)
        })?;

    let after = &outcome.transaction;
    if before.status != after.status {
        match after.status {
            WithdrawalStatus::Confirmed => state
                .metrics
                .withdrawals_confirmed_total
                .fetch_add(1, Ordering::SeqCst),
            WithdrawalStatus::Failed => state
                .metrics
                .withdrawals_failed_total
                .fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
    }
    if outcome.refunded && before.status != WithdrawalStatus::Failed {
        state
            .metrics
            .reservations_released_total
            .fetch_add(1, Ordering::SeqCst);
    }
    if after.retry_attempt > before.retry_attempt {
        state
            .metrics
            .settlement_retries_total
            .fetch_add(1, Ordering::SeqCst);
    }

    Ok(Json(outcome.into()))
}

/// Session account view
/// GET /sessions/:id
pub async fn session_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    state.metrics.record_request();

    let account = state
        .engine
        .ledger()
        .get_session(&session_id)
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    Ok(Json(account.into()))
}

//! Operator API handlers
//!
//! Approval gate actions, the reconciliation sweep, and the credit primitive,
//! guarded by an API key header.

use super::{errors::ApiError, handlers::AppState, middleware::RequestId, models::*};
use crate::ledger::LifetimeCounter;
use crate::withdrawal::store;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

// Simple API key check for operator endpoints
fn validate_admin_api_key(headers: &HeaderMap, request_id: &str) -> Result<(), ApiError> {
    if let Ok(expected_key) = std::env::var("CASHIER_ADMIN_API_KEY") {
        if let Some(provided_key) = headers.get("X-API-Key") {
            if provided_key.to_str().unwrap_or("") == expected_key {
                return Ok(());
            }
        }
        Err(ApiError::unauthorized(
            request_id.to_string(),
            "Invalid or missing admin API key".to_string(),
        ))
    } else {
        // No API key configured - allow for development
        Ok(())
    }
}

/// POST /admin/withdrawals/:id/approve
pub async fn approve_handler(
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    validate_admin_api_key(&headers, &request_id.0)?;
    state.metrics.record_request();

    let tx = state
        .engine
        .approve_withdrawal(&transaction_id)
        .await
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    Ok(Json(WithdrawResponse {
        transaction: tx.into(),
    }))
}

/// POST /admin/withdrawals/:id/reject
pub async fn reject_handler(
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    validate_admin_api_key(&headers, &request_id.0)?;
    state.metrics.record_request();

    let tx = state
        .engine
        .reject_withdrawal(&transaction_id, &body.reason)
        .await
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    state
        .metrics
        .withdrawals_rejected_total
        .fetch_add(1, Ordering::SeqCst);
    state
        .metrics
        .reservations_released_total
        .fetch_add(1, Ordering::SeqCst);

    Ok(Json(WithdrawResponse {
        transaction: tx.into(),
    }))
}

/// POST /admin/withdrawals/:id/requeue
pub async fn requeue_handler(
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    validate_admin_api_key(&headers, &request_id.0)?;
    state.metrics.record_request();

    let tx = state
        .engine
        .requeue_withdrawal(&transaction_id)
        .await
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    Ok(Json(WithdrawResponse {
        transaction: tx.into(),
    }))
}

/// POST /admin/withdrawals/approve-bulk
pub async fn approve_bulk_handler(
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<BulkResponse>, ApiError> {
    validate_admin_api_key(&headers, &request_id.0)?;
    state.metrics.record_request();

    let outcome = state.engine.approve_bulk(&body.transaction_ids).await;
    Ok(Json(outcome.into()))
}

/// POST /admin/withdrawals/reject-bulk
pub async fn reject_bulk_handler(
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<BulkResponse>, ApiError> {
    validate_admin_api_key(&headers, &request_id.0)?;
    state.metrics.record_request();

    let reason = body
        .reason
        .unwrap_or_else(|| "rejected by operator".to_string());
    let outcome = state.engine.reject_bulk(&body.transaction_ids, &reason).await;

    state
        .metrics
        .withdrawals_rejected_total
        .fetch_add(outcome.succeeded, Ordering::SeqCst);
    state
        .metrics
        .reservations_released_total
        .fetch_add(outcome.succeeded, Ordering::SeqCst);

    Ok(Json(outcome.into()))
}

/// GET /admin/withdrawals/pending-approval - queue for the operator UI
pub async fn pending_approval_handler(
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApprovalQuery>,
) -> Result<Json<PendingApprovalsResponse>, ApiError> {
    validate_admin_api_key(&headers, &request_id.0)?;
    state.metrics.record_request();

    // Limit query size to prevent abuse
    let limit = params.limit.unwrap_or(50).min(200);

    let (rows, next_cursor) = store::list_pending_approval(
        state.engine.storage(),
        params.cursor.as_deref(),
        limit,
    )
    .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    Ok(Json(PendingApprovalsResponse {
        withdrawals: rows.into_iter().map(Into::into).collect(),
        next_cursor,
    }))
}

/// POST /admin/reconcile - sweep every in-flight withdrawal through the
/// poller. Wired to an external scheduler, not an internal timer.
pub async fn reconcile_handler(
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    validate_admin_api_key(&headers, &request_id.0)?;
    state.metrics.record_request();

    let report = state
        .engine
        .reconcile_pending()
        .await
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    state
        .metrics
        .withdrawals_confirmed_total
        .fetch_add(report.confirmed, Ordering::SeqCst);
    state
        .metrics
        .withdrawals_failed_total
        .fetch_add(report.failed, Ordering::SeqCst);
    state
        .metrics
        .reservations_released_total
        .fetch_add(report.failed, Ordering::SeqCst);
    state
        .metrics
        .settlement_retries_total
        .fetch_add(report.retried, Ordering::SeqCst);

    Ok(Json(ReconcileResponse { report }))
}

/// POST /admin/sessions/:id/credit - credit a session, creating it first if
/// needed. Stand-in for the external deposit-detection service.
pub async fn credit_handler(
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<CreditBody>,
) -> Result<Json<CreditResponse>, ApiError> {
    validate_admin_api_key(&headers, &request_id.0)?;
    state.metrics.record_request();

    let ledger = state.engine.ledger();

    let mut account = ledger
        .load_session(&session_id)
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?
        .unwrap_or_else(|| crate::ledger::SessionAccount::new(session_id.clone()));

    if let Some(address) = body.withdrawal_address {
        account.withdrawal_address = Some(address);
    }
    if let Some(authenticated) = body.authenticated {
        account.is_authenticated = authenticated;
    }
    if let Some(demo) = body.demo {
        account.is_demo = demo;
    }
    ledger
        .put_session(&account)
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    let account = ledger
        .credit_funds(
            &session_id,
            body.amount,
            LifetimeCounter::TotalCredited,
            body.amount,
        )
        .await
        .map_err(|e| ApiError::from_cashier(request_id.0.clone(), e))?;

    Ok(Json(CreditResponse {
        session: account.into(),
    }))
}

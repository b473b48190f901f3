//! API Request/Response Models
//!
//! Wire shapes for the public and operator endpoints.

use crate::config::Network;
use crate::ledger::SessionAccount;
use crate::settlement::SettlementFault;
use crate::withdrawal::poller::ReconcileReport;
use crate::withdrawal::types::{BulkOutcome, PollOutcome, WithdrawalStatus, WithdrawalTransaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Node status response
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub node_info: NodeInfo,
    pub settlement: SettlementInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub id: String,
    pub network: String,
    pub version: String,
}

/// Settlement node reachability as of this request
#[derive(Debug, Clone, Serialize)]
pub struct SettlementInfo {
    pub reachable: bool,
    pub connected: bool,
    pub synced: bool,
}

/// Public withdraw request body
#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawBody {
    pub session_id: String,
    /// Amount in minor units; the fixed fee is charged on top
    pub amount: u64,
    pub idempotency_key: String,
}

/// Withdrawal transaction as returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalView {
    pub transaction_id: String,
    pub session_id: String,
    pub amount: u64,
    pub fee: u64,
    pub total_amount: u64,
    pub destination_address: String,
    pub network: Network,
    pub status: WithdrawalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub retry_attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SettlementFault>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl From<WithdrawalTransaction> for WithdrawalView {
    fn from(tx: WithdrawalTransaction) -> Self {
        Self {
            transaction_id: tx.id,
            session_id: tx.session_id,
            amount: tx.amount,
            fee: tx.fee,
            total_amount: tx.amount + tx.fee,
            destination_address: tx.destination_address,
            network: tx.network,
            status: tx.status,
            operation_id: tx.operation_id,
            retry_attempt: tx.retry_attempt,
            last_error: tx.last_error,
            tx_hash: tx.tx_hash,
            created_at: timestamp(tx.created_at),
            confirmed_at: tx.confirmed_at.map(timestamp),
        }
    }
}

/// Response for the withdraw endpoint
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawResponse {
    pub transaction: WithdrawalView,
}

/// Query parameters for the status endpoint
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub session_id: String,
}

/// Response for the status endpoint; `refunded` is the explicit
/// confirmation that the reservation went back to the session
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalStatusResponse {
    pub transaction: WithdrawalView,
    pub refunded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<PollOutcome> for WithdrawalStatusResponse {
    fn from(outcome: PollOutcome) -> Self {
        Self {
            transaction: outcome.transaction.into(),
            refunded: outcome.refunded,
            message: outcome.message,
        }
    }
}

/// Session account view
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub balance: u64,
    pub total_credited: u64,
    pub total_withdrawn: u64,
    pub is_authenticated: bool,
    pub is_demo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdrawal_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SessionAccount> for SessionView {
    fn from(account: SessionAccount) -> Self {
        Self {
            session_id: account.session_id,
            balance: account.balance,
            total_credited: account.total_credited,
            total_withdrawn: account.total_withdrawn,
            is_authenticated: account.is_authenticated,
            is_demo: account.is_demo,
            withdrawal_address: account.withdrawal_address,
            created_at: timestamp(account.created_at),
            updated_at: timestamp(account.updated_at),
        }
    }
}

/// Admin reject request body
#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

/// Admin bulk operation body
#[derive(Debug, Deserialize)]
pub struct BulkBody {
    pub transaction_ids: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Admin bulk operation response
#[derive(Debug, Clone, Serialize)]
pub struct BulkResponse {
    pub succeeded: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

impl From<BulkOutcome> for BulkResponse {
    fn from(outcome: BulkOutcome) -> Self {
        Self {
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            errors: outcome.errors,
        }
    }
}

/// Query parameters for the pending-approval listing
#[derive(Debug, Deserialize)]
pub struct ApprovalQuery {
    /// Maximum number of rows to return (default 50, capped at 200)
    pub limit: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Response for the pending-approval listing
#[derive(Debug, Clone, Serialize)]
pub struct PendingApprovalsResponse {
    pub withdrawals: Vec<WithdrawalView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Response for the reconciliation sweep
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResponse {
    pub report: ReconcileReport,
}

/// Admin credit request body. Creates the session if it does not exist yet,
/// standing in for the external deposit-detection service.
#[derive(Debug, Deserialize)]
pub struct CreditBody {
    pub amount: u64,
    #[serde(default)]
    pub withdrawal_address: Option<String>,
    #[serde(default)]
    pub authenticated: Option<bool>,
    #[serde(default)]
    pub demo: Option<bool>,
}

/// Admin credit response
#[derive(Debug, Clone, Serialize)]
pub struct CreditResponse {
    pub session: SessionView,
}

fn timestamp(secs: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs as i64, 0).unwrap_or_else(Utc::now)
}

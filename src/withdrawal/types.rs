//! Withdrawal transaction records
//!
//! A transaction row is a claim against its session's reserved balance while
//! non-terminal. Rows are created once per logical withdrawal request
//! (deduplicated by idempotency key), mutated only by the poller or the
//! approval gate, and never deleted: failed and confirmed rows are permanent
//! audit records.

use crate::config::Network;
use crate::settlement::SettlementFault;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Withdrawal lifecycle states
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Created above the approval threshold; waiting on an operator
    PendingApproval,
    /// Submitted to the settlement network, outcome unknown
    Pending,
    /// Settled on-chain; the reservation became permanent
    Confirmed,
    /// Terminal failure; the reservation was released back to the session
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Confirmed | WithdrawalStatus::Failed)
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawalStatus::PendingApproval => write!(f, "pending_approval"),
            WithdrawalStatus::Pending => write!(f, "pending"),
            WithdrawalStatus::Confirmed => write!(f, "confirmed"),
            WithdrawalStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Persisted withdrawal transaction row
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalTransaction {
    pub id: String,
    pub session_id: String,
    /// Amount delivered to the destination, minor units
    pub amount: u64,
    /// Fee charged to the session and reserved with the amount; fixed at
    /// creation, unaffected by retry fee escalation
    pub fee: u64,
    pub destination_address: String,
    pub network: Network,
    /// External async handle; set after the first successful submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub status: WithdrawalStatus,
    /// Internal resubmission count; 0 for the initial submission
    pub retry_attempt: u32,
    /// Most recent settlement fault, structured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SettlementFault>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub idempotency_key: String,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<u64>,
}

impl WithdrawalTransaction {
    /// Amount reserved against the session: amount + charged fee
    pub fn total_amount(&self) -> u64 {
        self.amount + self.fee
    }
}

/// Result of advancing a transaction through the poller
#[derive(Clone, Debug, Serialize)]
pub struct PollOutcome {
    pub transaction: WithdrawalTransaction,
    /// True when this call (or an earlier one) released the reservation
    pub refunded: bool,
    /// Advisory text, e.g. when the settlement node was unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-item result shape for bulk admin operations
#[derive(Clone, Debug, Default, Serialize)]
pub struct BulkOutcome {
    pub succeeded: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(WithdrawalStatus::Confirmed.is_terminal());
        assert!(WithdrawalStatus::Failed.is_terminal());
        assert!(!WithdrawalStatus::Pending.is_terminal());
        assert!(!WithdrawalStatus::PendingApproval.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&WithdrawalStatus::PendingApproval).unwrap();
        assert_eq!(json, "\"pending_approval\"");
    }
}

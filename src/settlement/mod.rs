//! Settlement node interface
//!
//! Thin surface over the external settlement network: submit a send, poll an
//! in-flight operation, check source-wallet liquidity and node connectivity.
//! The engine consumes this trait only; the node's RPC details stay behind it.
//!
//! Fault classification also lives here. The node reports failures as raw
//! error text; `classify_node_error` maps that text onto an enumerated
//! `FaultKind` once, at the boundary, so nothing downstream ever matches on
//! wording from the external service.

pub mod simulated;

use crate::config::Network;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Node connectivity and sync state
#[derive(Clone, Copy, Debug)]
pub struct NodeStatus {
    pub connected: bool,
    pub synced: bool,
}

impl NodeStatus {
    pub fn is_usable(&self) -> bool {
        self.connected && self.synced
    }
}

/// Liquid balance of a wallet as the node sees it, in minor units
#[derive(Clone, Copy, Debug)]
pub struct SourceBalance {
    pub confirmed: u64,
    pub pending: u64,
}

/// Result of the node-side address checksum predicate
#[derive(Clone, Debug)]
pub struct ChecksumCheck {
    pub is_valid: bool,
    pub error: Option<String>,
}

/// Parameters for a fire-and-forget send submission
#[derive(Clone, Debug)]
pub struct SendRequest {
    pub source: String,
    pub destination: String,
    /// Amount delivered to the destination, minor units
    pub amount: u64,
    pub memo: String,
    pub network: Network,
    /// 0 for the first submission, incremented per internal retry
    pub attempt: u32,
    /// Network fee to attach; None lets the node pick its default
    pub fee_override: Option<u64>,
}

/// Handle for an in-flight asynchronous send
#[derive(Clone, Debug)]
pub struct SubmittedOperation {
    pub operation_id: String,
}

/// Terminal-or-not state of an in-flight operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    Queued,
    Executing,
    Success { txid: String },
    Failed { fault: SettlementFault },
}

/// Structured settlement failure stored on the transaction row
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementFault {
    pub kind: FaultKind,
    pub message: String,
}

impl SettlementFault {
    pub fn from_node_error(raw: &str) -> Self {
        Self {
            kind: classify_node_error(raw),
            message: raw.to_string(),
        }
    }
}

/// Enumerated settlement failure kinds
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The node's per-action fee market rejected the attached fee; a
    /// resubmission with a higher fee can succeed
    UnpaidActionLimit,
    /// Source wallet could not cover amount + network fee
    InsufficientSourceFunds,
    /// Destination rejected by the network
    InvalidDestination,
    /// Operation aged out of the node's queue
    Expired,
    /// Node or house wallet was unavailable before submission; never
    /// produced by the classifier
    NodeUnavailable,
    /// Rejected by an operator, not by the network; never produced by the
    /// classifier
    Rejected,
    /// Anything the classifier does not recognize
    Unknown,
}

impl FaultKind {
    /// Whether the escalating-fee retry loop may resubmit after this fault
    pub fn is_retryable(&self) -> bool {
        matches!(self, FaultKind::UnpaidActionLimit)
    }
}

/// Map raw node error text onto a `FaultKind`.
///
/// Matching on wording happens only here; the rest of the engine sees the
/// enum. Unrecognized text is terminal (`Unknown`), never retried.
pub fn classify_node_error(raw: &str) -> FaultKind {
    let lower = raw.to_lowercase();
    if lower.contains("unpaid action limit") {
        FaultKind::UnpaidActionLimit
    } else if lower.contains("insufficient") && (lower.contains("funds") || lower.contains("balance")) {
        FaultKind::InsufficientSourceFunds
    } else if lower.contains("invalid") && (lower.contains("address") || lower.contains("destination")) {
        FaultKind::InvalidDestination
    } else if lower.contains("expired") {
        FaultKind::Expired
    } else {
        FaultKind::Unknown
    }
}

/// Local, offline address shape check. The authoritative checksum predicate
/// is the node's (`validate_address_checksum`); this only rejects obvious
/// garbage before any RPC is spent on it.
pub fn address_format_ok(address: &str, network: Network) -> bool {
    let prefix = match network {
        Network::Mainnet => "mw1",
        Network::Testnet => "tw1",
    };
    address.len() >= 20
        && address.len() <= 96
        && address.starts_with(prefix)
        && address.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Submitter call failures.
///
/// `Unreachable` means the outcome is unknown, not that the operation
/// failed: the send may still succeed off-band. Callers must never refund
/// on this variant.
#[derive(Debug, Error)]
pub enum SubmitterError {
    #[error("Settlement node unreachable: {0}")]
    Unreachable(String),

    #[error("Settlement node protocol error: {0}")]
    Protocol(String),
}

/// Interface to the external settlement network
#[async_trait]
pub trait SettlementSubmitter: Send + Sync {
    /// Node connectivity and sync state
    async fn check_node_status(&self, network: Network) -> Result<NodeStatus, SubmitterError>;

    /// Liquid balance of a wallet
    async fn get_source_balance(
        &self,
        address: &str,
        network: Network,
    ) -> Result<SourceBalance, SubmitterError>;

    /// Node-side address checksum validation
    async fn validate_address_checksum(
        &self,
        address: &str,
        network: Network,
    ) -> Result<ChecksumCheck, SubmitterError>;

    /// Fire-and-forget send; does not block for confirmation
    async fn submit_send(&self, request: SendRequest) -> Result<SubmittedOperation, SubmitterError>;

    /// Poll an in-flight operation for a terminal result
    async fn get_operation_status(
        &self,
        operation_id: &str,
        network: Network,
    ) -> Result<OperationStatus, SubmitterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_recognizes_unpaid_action_limit() {
        let kind = classify_node_error("sendFunds: unpaid action limit exceeded (attempt 2)");
        assert_eq!(kind, FaultKind::UnpaidActionLimit);
        assert!(kind.is_retryable());
    }

    #[test]
    fn test_classifier_is_case_insensitive() {
        assert_eq!(
            classify_node_error("UNPAID ACTION LIMIT EXCEEDED"),
            FaultKind::UnpaidActionLimit
        );
    }

    #[test]
    fn test_classifier_terminal_kinds_are_not_retryable() {
        for raw in [
            "insufficient funds in source wallet",
            "invalid destination address",
            "operation expired after 120 blocks",
            "some novel error the node made up today",
        ] {
            assert!(!classify_node_error(raw).is_retryable(), "{}", raw);
        }
    }

    #[test]
    fn test_classifier_unknown_for_unrecognized_text() {
        assert_eq!(classify_node_error("flux capacitor offline"), FaultKind::Unknown);
    }

    #[test]
    fn test_address_format_check() {
        assert!(address_format_ok(
            "tw1qhouse00000000000000000000000000",
            Network::Testnet
        ));
        // Wrong network prefix
        assert!(!address_format_ok(
            "tw1qhouse00000000000000000000000000",
            Network::Mainnet
        ));
        // Too short
        assert!(!address_format_ok("tw1short", Network::Testnet));
        // Bad characters
        assert!(!address_format_ok(
            "tw1qhouse_00000000000000000000000!",
            Network::Testnet
        ));
    }

    #[test]
    fn test_fault_round_trips_through_serde() {
        let fault = SettlementFault::from_node_error("unpaid action limit exceeded");
        let json = serde_json::to_string(&fault).unwrap();
        let back: SettlementFault = serde_json::from_str(&json).unwrap();
        assert_eq!(fault, back);
    }
}

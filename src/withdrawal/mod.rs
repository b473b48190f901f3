//! Withdrawal processing engine
//!
//! The engine is split along the lifecycle: `handler` validates and reserves,
//! `poller` advances in-flight operations, `approval` is the manual override
//! path. All three share one `WithdrawalEngine`, so the saga pieces (reserve,
//! submit, compensating release) stay next to each other.

pub mod approval;
pub mod handler;
pub mod poller;
pub mod retry;
pub mod store;
#[cfg(test)]
pub(crate) mod testutil;
pub mod types;

use crate::config::{SettlementConfig, WithdrawalConfig};
use crate::errors::{CashierError, CashierResult};
use crate::hooks::{AuditLog, KillSwitch, RateLimiter};
use crate::ledger::Ledger;
use crate::settlement::SettlementSubmitter;
use crate::storage::CashierStorage;
use crate::withdrawal::types::WithdrawalTransaction;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared state for the withdrawal lifecycle components
#[derive(Clone)]
pub struct WithdrawalEngine {
    pub(crate) storage: CashierStorage,
    pub(crate) ledger: Ledger,
    pub(crate) submitter: Arc<dyn SettlementSubmitter>,
    pub(crate) withdrawal_cfg: WithdrawalConfig,
    pub(crate) settlement_cfg: SettlementConfig,
    pub(crate) kill_switch: Arc<dyn KillSwitch>,
    pub(crate) rate_limiter: Arc<dyn RateLimiter>,
    pub(crate) audit: Arc<dyn AuditLog>,
}

impl WithdrawalEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: CashierStorage,
        ledger: Ledger,
        submitter: Arc<dyn SettlementSubmitter>,
        withdrawal_cfg: WithdrawalConfig,
        settlement_cfg: SettlementConfig,
        kill_switch: Arc<dyn KillSwitch>,
        rate_limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            storage,
            ledger,
            submitter,
            withdrawal_cfg,
            settlement_cfg,
            kill_switch,
            rate_limiter,
            audit,
        }
    }

    /// The ledger this engine reserves against
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Network this engine settles on
    pub fn network(&self) -> crate::config::Network {
        self.settlement_cfg.network
    }

    /// Reachability probe against the settlement node
    pub async fn settlement_status(
        &self,
    ) -> Result<crate::settlement::NodeStatus, crate::settlement::SubmitterError> {
        self.submitter
            .check_node_status(self.settlement_cfg.network)
            .await
    }

    /// The storage the transaction rows live in
    pub fn storage(&self) -> &CashierStorage {
        &self.storage
    }

    /// Load a transaction row or fail with NotFound
    pub fn get_transaction(&self, id: &str) -> CashierResult<WithdrawalTransaction> {
        store::load_transaction(&self.storage, id)?
            .ok_or_else(|| CashierError::NotFound(format!("withdrawal {}", id)))
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

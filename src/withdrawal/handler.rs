//! Withdrawal request handling
//!
//! The request flow is a saga with two non-atomic phases. Phase one
//! (validate, reserve, persist) commits locally under the session lock;
//! phase two (the external send) runs afterwards, with `fail_reserved` as
//! the compensating action on any downstream failure. The external call can
//! never be rolled back, so it is never made inside the reservation unit.

use crate::errors::{CashierError, CashierResult};
use crate::hooks::AuditEvent;
use crate::ledger::LifetimeCounter;
use crate::settlement::{address_format_ok, FaultKind, SendRequest, SettlementFault};
use crate::withdrawal::store;
use crate::withdrawal::types::{WithdrawalStatus, WithdrawalTransaction};
use crate::withdrawal::{now_secs, WithdrawalEngine};
use crate::config::Network;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A withdrawal request as received from the public surface
#[derive(Clone, Debug)]
pub struct WithdrawRequest {
    pub session_id: String,
    /// Amount delivered to the destination, minor units; fee comes on top
    pub amount: u64,
    pub idempotency_key: String,
}

impl WithdrawalEngine {
    /// Validate a withdrawal request, reserve funds, and either park it for
    /// approval, confirm it instantly (demo), or submit it to settlement.
    pub async fn request_withdrawal(
        &self,
        request: WithdrawRequest,
    ) -> CashierResult<WithdrawalTransaction> {
        if self.kill_switch.is_active() {
            return Err(CashierError::Maintenance);
        }
        if !self.rate_limiter.allow(&request.session_id) {
            return Err(CashierError::RateLimited);
        }

        let session = self.ledger.get_session(&request.session_id)?;

        if !session.is_authenticated && !session.is_demo {
            return Err(CashierError::Unauthorized(
                "session is not authenticated".to_string(),
            ));
        }

        let network = self.settlement_cfg.network;
        let destination = match (&session.withdrawal_address, session.is_demo) {
            (Some(address), _) => address.clone(),
            (None, true) => format!("demo-{}", session.session_id),
            (None, false) => {
                return Err(CashierError::Validation(
                    "no withdrawal address registered for this session".to_string(),
                ));
            }
        };

        if !session.is_demo {
            if !address_format_ok(&destination, network) {
                return Err(CashierError::Validation(format!(
                    "registered address {} is not a valid {} address",
                    destination, network
                )));
            }
            // The production network gets the node's checksum verdict too.
            if network == Network::Mainnet {
                let check = self
                    .submitter
                    .validate_address_checksum(&destination, network)
                    .await
                    .map_err(|e| CashierError::SettlementUnavailable(e.to_string()))?;
                if !check.is_valid {
                    return Err(CashierError::Validation(check.error.unwrap_or_else(|| {
                        format!("address {} failed checksum validation", destination)
                    })));
                }
            }
        }

        if request.amount < self.withdrawal_cfg.min_withdrawal {
            return Err(CashierError::Validation(format!(
                "amount {} below minimum withdrawal of {} units",
                request.amount, self.withdrawal_cfg.min_withdrawal
            )));
        }

        let fee = self.withdrawal_cfg.withdrawal_fee;
        let total_amount = request.amount.checked_add(fee).ok_or_else(|| {
            CashierError::Validation("amount overflows with fee applied".to_string())
        })?;
        if total_amount > session.balance {
            return Err(CashierError::InsufficientBalance {
                required: total_amount,
                available: session.balance,
            });
        }

        // Fast path: a retried request returns the original row untouched.
        if let Some(existing) =
            store::load_by_idempotency(&self.storage, &request.session_id, &request.idempotency_key)?
        {
            tracing::debug!(
                tx_id = %existing.id,
                session_id = %request.session_id,
                "idempotent withdrawal replay"
            );
            return Ok(existing);
        }

        let needs_approval = self.withdrawal_cfg.approval_threshold != 0
            && request.amount >= self.withdrawal_cfg.approval_threshold
            && !session.is_demo;

        let mut tx = WithdrawalTransaction {
            id: Uuid::new_v4().to_string(),
            session_id: request.session_id.clone(),
            amount: request.amount,
            fee,
            destination_address: destination,
            network,
            operation_id: None,
            status: if needs_approval {
                WithdrawalStatus::PendingApproval
            } else if session.is_demo {
                WithdrawalStatus::Confirmed
            } else {
                WithdrawalStatus::Pending
            },
            retry_attempt: 0,
            last_error: None,
            tx_hash: None,
            idempotency_key: request.idempotency_key.clone(),
            created_at: now_secs(),
            confirmed_at: None,
        };

        if session.is_demo {
            tx.tx_hash = Some(demo_reference(&tx.id));
            tx.confirmed_at = Some(now_secs());
        }

        // Phase one: reservation and row creation in one atomic unit, with
        // the idempotency check repeated under the session lock.
        {
            let guard = self.ledger.lock_session(&request.session_id).await;
            if let Some(existing) = store::load_by_idempotency(
                &self.storage,
                &request.session_id,
                &request.idempotency_key,
            )? {
                return Ok(existing);
            }
            let rows = store::creation_rows(&tx)?;
            self.ledger.reserve_funds(
                &guard,
                total_amount,
                LifetimeCounter::TotalWithdrawn,
                request.amount,
                rows,
            )?;
        }

        self.audit.record(AuditEvent::WithdrawalRequested {
            session_id: tx.session_id.clone(),
            transaction_id: tx.id.clone(),
            amount: tx.amount,
            fee: tx.fee,
        });
        tracing::info!(
            tx_id = %tx.id,
            session_id = %tx.session_id,
            amount = tx.amount,
            status = %tx.status,
            "withdrawal reserved"
        );

        match tx.status {
            WithdrawalStatus::PendingApproval => Ok(tx),
            WithdrawalStatus::Confirmed => {
                // Demo sessions settle locally; the reservation is permanent.
                self.audit.record(AuditEvent::WithdrawalConfirmed {
                    session_id: tx.session_id.clone(),
                    transaction_id: tx.id.clone(),
                    tx_hash: tx.tx_hash.clone().unwrap_or_default(),
                });
                Ok(tx)
            }
            _ => self.submit_reserved(tx).await,
        }
    }

    /// Phase two of the saga: liquidity and connectivity checks, then the
    /// fire-and-forget send. Any failure here releases the reservation and
    /// marks the row failed. Also the second half of an admin approval.
    pub(crate) async fn submit_reserved(
        &self,
        mut tx: WithdrawalTransaction,
    ) -> CashierResult<WithdrawalTransaction> {
        debug_assert_eq!(tx.status, WithdrawalStatus::Pending);
        let network = tx.network;

        match self.submitter.check_node_status(network).await {
            Ok(status) if status.is_usable() => {}
            Ok(_) => {
                return self
                    .fail_reserved(tx, "settlement node is not synced".to_string())
                    .await;
            }
            Err(e) => {
                return self
                    .fail_reserved(tx, format!("settlement node unreachable: {}", e))
                    .await;
            }
        }

        let house_wallet = self.settlement_cfg.house_wallet(network).to_string();
        match self.submitter.get_source_balance(&house_wallet, network).await {
            Ok(balance) if balance.confirmed >= tx.amount => {}
            Ok(balance) => {
                tracing::warn!(
                    tx_id = %tx.id,
                    required = tx.amount,
                    available = balance.confirmed,
                    "house wallet cannot cover withdrawal"
                );
                return self
                    .fail_reserved(tx, "house wallet has insufficient liquid funds".to_string())
                    .await;
            }
            Err(e) => {
                return self
                    .fail_reserved(tx, format!("house wallet balance check failed: {}", e))
                    .await;
            }
        }

        let send = SendRequest {
            source: house_wallet,
            destination: tx.destination_address.clone(),
            amount: tx.amount,
            memo: format!("wd:{}", tx.id),
            network,
            attempt: 0,
            fee_override: Some(tx.fee),
        };

        match self.submitter.submit_send(send).await {
            Ok(submitted) => {
                tx.operation_id = Some(submitted.operation_id);
                store::store_transaction(&self.storage, &tx)?;
                tracing::info!(
                    tx_id = %tx.id,
                    operation_id = tx.operation_id.as_deref().unwrap_or(""),
                    "withdrawal submitted to settlement"
                );
                Ok(tx)
            }
            Err(e) => {
                self.fail_reserved(tx, format!("send submission failed: {}", e))
                    .await
            }
        }
    }

    /// Compensating action for phase-two failures: release the reservation
    /// exactly once and mark the row failed. The row's status is re-checked
    /// under the session lock so a racing poller cannot double-release.
    async fn fail_reserved(
        &self,
        tx: WithdrawalTransaction,
        reason: String,
    ) -> CashierResult<WithdrawalTransaction> {
        let guard = self.ledger.lock_session(&tx.session_id).await;
        let mut current = self.get_transaction(&tx.id)?;
        if current.status.is_terminal() {
            // Someone else resolved it; the reservation is already settled.
            return Err(CashierError::SettlementUnavailable(reason));
        }

        current.status = WithdrawalStatus::Failed;
        current.last_error = Some(SettlementFault {
            kind: FaultKind::NodeUnavailable,
            message: reason.clone(),
        });

        let rows = store::update_rows(&current)?;
        self.ledger.release_funds(
            &guard,
            current.total_amount(),
            LifetimeCounter::TotalWithdrawn,
            current.amount,
            rows,
        )?;
        drop(guard);
        store::cleanup_markers(&self.storage, &current);

        self.audit.record(AuditEvent::FundsReleased {
            session_id: current.session_id.clone(),
            transaction_id: current.id.clone(),
            total_amount: current.total_amount(),
        });
        self.audit.record(AuditEvent::WithdrawalFailed {
            session_id: current.session_id.clone(),
            transaction_id: current.id.clone(),
            reason: reason.clone(),
        });
        tracing::warn!(tx_id = %current.id, %reason, "withdrawal failed before settlement; funds released");

        // Callers get the refund confirmation in the error itself.
        Err(CashierError::SettlementUnavailable(format!(
            "{}; reservation released back to session",
            reason
        )))
    }
}

/// Locally generated settlement reference for demo confirmations
fn demo_reference(tx_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"demo:");
    hasher.update(tx_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WithdrawalConfig;
    use crate::withdrawal::testutil::{harness, seed_player};

    fn withdraw(amount: u64, key: &str) -> WithdrawRequest {
        WithdrawRequest {
            session_id: "s1".to_string(),
            amount,
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_accepted_withdrawal_reserves_amount_plus_fee() {
        let h = harness(WithdrawalConfig::default());
        seed_player(&h.engine, "s1", 10_000).await;

        let tx = h.engine.request_withdrawal(withdraw(4_999, "k1")).await.unwrap();
        assert_eq!(tx.status, WithdrawalStatus::Pending);
        assert_eq!(tx.total_amount(), 5_000);
        assert!(tx.operation_id.is_some());

        let account = h.engine.ledger.get_session("s1").unwrap();
        assert_eq!(account.balance, 5_000);
        assert_eq!(account.total_withdrawn, 4_999);
    }

    #[tokio::test]
    async fn test_amount_plus_fee_exceeding_balance_is_rejected() {
        let h = harness(WithdrawalConfig::default());
        seed_player(&h.engine, "s1", 5_500).await;

        let err = h.engine.request_withdrawal(withdraw(5_500, "k1")).await.unwrap_err();
        assert!(matches!(
            err,
            CashierError::InsufficientBalance {
                required: 5_501,
                available: 5_500
            }
        ));
    }

    #[tokio::test]
    async fn test_idempotent_replay_returns_same_row_and_reserves_once() {
        let h = harness(WithdrawalConfig::default());
        seed_player(&h.engine, "s1", 10_000).await;

        let first = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap();
        let second = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap();
        assert_eq!(first.id, second.id);

        let account = h.engine.ledger.get_session("s1").unwrap();
        assert_eq!(account.balance, 10_000 - 1_001);
        assert_eq!(h.node.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_withdrawals() {
        let h = harness(WithdrawalConfig::default());
        seed_player(&h.engine, "s1", 10_000).await;
        h.kill_switch.set_active(true);

        let err = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap_err();
        assert!(matches!(err, CashierError::Maintenance));
    }

    #[tokio::test]
    async fn test_unauthenticated_session_is_rejected() {
        let h = harness(WithdrawalConfig::default());
        let mut account = crate::ledger::SessionAccount::new("s1".to_string());
        account.withdrawal_address = Some("tw1qplayer0000000000000000000000000".to_string());
        h.engine.ledger.put_session(&account).unwrap();

        let err = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap_err();
        assert!(matches!(err, CashierError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_missing_address_is_rejected() {
        let h = harness(WithdrawalConfig::default());
        let mut account = crate::ledger::SessionAccount::new("s1".to_string());
        account.is_authenticated = true;
        h.engine.ledger.put_session(&account).unwrap();
        h.engine
            .ledger
            .credit_funds("s1", 10_000, LifetimeCounter::TotalCredited, 10_000)
            .await
            .unwrap();

        let err = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap_err();
        assert!(matches!(err, CashierError::Validation(_)));
    }

    #[tokio::test]
    async fn test_below_minimum_amount_is_rejected() {
        let h = harness(WithdrawalConfig::default());
        seed_player(&h.engine, "s1", 10_000).await;

        let err = h.engine.request_withdrawal(withdraw(99, "k1")).await.unwrap_err();
        assert!(matches!(err, CashierError::Validation(_)));
    }

    #[tokio::test]
    async fn test_threshold_parks_transaction_without_touching_settlement() {
        let h = harness(WithdrawalConfig {
            approval_threshold: 10_000,
            ..Default::default()
        });
        seed_player(&h.engine, "s1", 20_000).await;

        let tx = h.engine.request_withdrawal(withdraw(15_000, "k1")).await.unwrap();
        assert_eq!(tx.status, WithdrawalStatus::PendingApproval);
        assert!(tx.operation_id.is_none());
        assert_eq!(h.node.submission_count(), 0);

        // Funds are reserved while parked
        let account = h.engine.ledger.get_session("s1").unwrap();
        assert_eq!(account.balance, 20_000 - 15_001);
    }

    #[tokio::test]
    async fn test_demo_session_confirms_locally() {
        let h = harness(WithdrawalConfig::default());
        let mut account = crate::ledger::SessionAccount::new("s1".to_string());
        account.is_demo = true;
        h.engine.ledger.put_session(&account).unwrap();
        h.engine
            .ledger
            .credit_funds("s1", 10_000, LifetimeCounter::TotalCredited, 10_000)
            .await
            .unwrap();

        let tx = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap();
        assert_eq!(tx.status, WithdrawalStatus::Confirmed);
        assert!(tx.tx_hash.is_some());
        assert_eq!(h.node.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_node_down_releases_reservation_and_reports_unavailable() {
        let h = harness(WithdrawalConfig::default());
        seed_player(&h.engine, "s1", 10_000).await;
        h.node.set_unreachable(true);

        let err = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap_err();
        assert!(matches!(err, CashierError::SettlementUnavailable(_)));

        // The compensating release restored the balance exactly.
        let account = h.engine.ledger.get_session("s1").unwrap();
        assert_eq!(account.balance, 10_000);
        assert_eq!(account.total_withdrawn, 0);

        // The failed row remains as an audit record.
        let existing = store::load_by_idempotency(&h.engine.storage, "s1", "k1")
            .unwrap()
            .unwrap();
        assert_eq!(existing.status, WithdrawalStatus::Failed);
    }

    #[tokio::test]
    async fn test_underfunded_house_wallet_releases_reservation() {
        let h = harness(WithdrawalConfig::default());
        seed_player(&h.engine, "s1", 10_000).await;
        let settlement = &h.engine.settlement_cfg;
        h.node
            .fund_source(settlement.network, settlement.house_wallet(settlement.network), 50);

        let err = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap_err();
        assert!(matches!(err, CashierError::SettlementUnavailable(_)));

        let account = h.engine.ledger.get_session("s1").unwrap();
        assert_eq!(account.balance, 10_000);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let h = harness(WithdrawalConfig::default());
        let err = h.engine.request_withdrawal(withdraw(1_000, "k1")).await.unwrap_err();
        assert!(matches!(err, CashierError::NotFound(_)));
    }
}

//! Manual approval gate
//!
//! High-value withdrawals park in `pending_approval` with their funds
//! already reserved. Operators resolve them here: approve hands the row to
//! the submission phase, reject releases the reservation, requeue re-opens a
//! terminally failed row as a fresh approval-gated transaction. The original
//! rows always survive untouched as audit records.

use crate::errors::{CashierError, CashierResult};
use crate::hooks::AuditEvent;
use crate::ledger::LifetimeCounter;
use crate::settlement::{FaultKind, SettlementFault};
use crate::withdrawal::store;
use crate::withdrawal::types::{BulkOutcome, WithdrawalStatus, WithdrawalTransaction};
use crate::withdrawal::{now_secs, WithdrawalEngine};
use uuid::Uuid;

impl WithdrawalEngine {
    /// Approve a parked withdrawal: flip it to pending and run the
    /// liquidity/connectivity checks and send submission, exactly as a
    /// below-threshold request would have.
    pub async fn approve_withdrawal(
        &self,
        transaction_id: &str,
    ) -> CashierResult<WithdrawalTransaction> {
        let tx = {
            let preliminary = self.get_transaction(transaction_id)?;
            let guard = self.ledger.lock_session(&preliminary.session_id).await;
            let mut current = self.get_transaction(transaction_id)?;
            if current.status != WithdrawalStatus::PendingApproval {
                return Err(CashierError::Validation(format!(
                    "withdrawal {} is {}, not awaiting approval",
                    transaction_id, current.status
                )));
            }
            current.status = WithdrawalStatus::Pending;
            store::store_transaction(&self.storage, &current)?;
            drop(guard);
            current
        };

        self.audit.record(AuditEvent::AdminAction {
            transaction_id: tx.id.clone(),
            action: "approve".to_string(),
            reason: None,
        });
        tracing::info!(tx_id = %tx.id, "withdrawal approved by operator");

        self.submit_reserved(tx).await
    }

    /// Reject a parked withdrawal and release its reservation
    pub async fn reject_withdrawal(
        &self,
        transaction_id: &str,
        reason: &str,
    ) -> CashierResult<WithdrawalTransaction> {
        let preliminary = self.get_transaction(transaction_id)?;
        let guard = self.ledger.lock_session(&preliminary.session_id).await;
        let mut current = self.get_transaction(transaction_id)?;
        if current.status != WithdrawalStatus::PendingApproval {
            return Err(CashierError::Validation(format!(
                "withdrawal {} is {}, not awaiting approval",
                transaction_id, current.status
            )));
        }

        current.status = WithdrawalStatus::Failed;
        current.last_error = Some(SettlementFault {
            kind: FaultKind::Rejected,
            message: reason.to_string(),
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

        self.audit.record(AuditEvent::AdminAction {
            transaction_id: current.id.clone(),
            action: "reject".to_string(),
            reason: Some(reason.to_string()),
        });
        self.audit.record(AuditEvent::FundsReleased {
            session_id: current.session_id.clone(),
            transaction_id: current.id.clone(),
            total_amount: current.total_amount(),
        });
        tracing::info!(tx_id = %current.id, %reason, "withdrawal rejected; reservation released");

        Ok(current)
    }

    /// Re-open a terminally failed withdrawal as a new approval-gated row,
    /// re-reserving amount + fee. The failed original is left unmodified.
    pub async fn requeue_withdrawal(
        &self,
        transaction_id: &str,
    ) -> CashierResult<WithdrawalTransaction> {
        let original = self.get_transaction(transaction_id)?;
        if original.status != WithdrawalStatus::Failed {
            return Err(CashierError::Validation(format!(
                "withdrawal {} is {}, only failed withdrawals can be requeued",
                transaction_id, original.status
            )));
        }

        // Deterministic key: double-submitting the same requeue is a replay,
        // not a second reservation.
        let idempotency_key = format!("requeue:{}", original.id);

        let new_tx = WithdrawalTransaction {
            id: Uuid::new_v4().to_string(),
            session_id: original.session_id.clone(),
            amount: original.amount,
            fee: original.fee,
            destination_address: original.destination_address.clone(),
            network: original.network,
            operation_id: None,
            status: WithdrawalStatus::PendingApproval,
            retry_attempt: 0,
            last_error: None,
            tx_hash: None,
            idempotency_key: idempotency_key.clone(),
            created_at: now_secs(),
            confirmed_at: None,
        };

        {
            let guard = self.ledger.lock_session(&original.session_id).await;
            if let Some(existing) =
                store::load_by_idempotency(&self.storage, &original.session_id, &idempotency_key)?
            {
                return Ok(existing);
            }
            let rows = store::creation_rows(&new_tx)?;
            self.ledger.reserve_funds(
                &guard,
                new_tx.total_amount(),
                LifetimeCounter::TotalWithdrawn,
                new_tx.amount,
                rows,
            )?;
        }

        self.audit.record(AuditEvent::AdminAction {
            transaction_id: original.id.clone(),
            action: "requeue".to_string(),
            reason: Some(format!("requeued as {}", new_tx.id)),
        });
        tracing::info!(
            original = %original.id,
            requeued = %new_tx.id,
            "failed withdrawal requeued for approval"
        );

        Ok(new_tx)
    }

    /// Approve a batch; every item succeeds or fails on its own
    pub async fn approve_bulk(&self, transaction_ids: &[String]) -> BulkOutcome {
        let results = futures::future::join_all(
            transaction_ids
                .iter()
                .map(|id| self.approve_withdrawal(id)),
        )
        .await;
        collect_bulk(transaction_ids, results)
    }

    /// Reject a batch; every item succeeds or fails on its own
    pub async fn reject_bulk(&self, transaction_ids: &[String], reason: &str) -> BulkOutcome {
        let results = futures::future::join_all(
            transaction_ids
                .iter()
                .map(|id| self.reject_withdrawal(id, reason)),
        )
        .await;
        collect_bulk(transaction_ids, results)
    }
}

fn collect_bulk(
    ids: &[String],
    results: Vec<CashierResult<WithdrawalTransaction>>,
) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(_) => outcome.succeeded += 1,
            Err(e) => {
                outcome.failed += 1;
                outcome.errors.push(format!("{}: {}", id, e));
            }
        }
    }
    outcome
}

//! Operation status polling
//!
//! Advances a transaction's state machine by querying the settlement node.
//! Invoked on demand (status endpoint, admin action, reconcile sweep); this
//! core owns no timer. Two rules keep the money honest:
//!
//! - A terminal row is never re-queried and never mutated again; the release
//!   on failure happens exactly once, guarded by re-checking the row status
//!   under the session lock.
//! - An unreachable node means the outcome is unknown. The row stays
//!   pending and nothing is refunded: the operation may still succeed
//!   off-band, and a premature refund would double-spend.

use crate::errors::CashierResult;
use crate::hooks::AuditEvent;
use crate::ledger::LifetimeCounter;
use crate::settlement::{OperationStatus, SendRequest, SettlementFault};
use crate::withdrawal::retry::{self, RetryDecision};
use crate::withdrawal::store;
use crate::withdrawal::types::{PollOutcome, WithdrawalStatus, WithdrawalTransaction};
use crate::withdrawal::{now_secs, WithdrawalEngine};
use serde::Serialize;

/// Outcome counts of a reconciliation sweep over in-flight rows
#[derive(Clone, Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub scanned: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub retried: u64,
    pub still_pending: u64,
}

impl WithdrawalEngine {
    /// Advance one transaction. Terminal and approval-parked rows are
    /// returned unchanged without touching the settlement node.
    pub async fn poll_transaction(&self, transaction_id: &str) -> CashierResult<PollOutcome> {
        let tx = self.get_transaction(transaction_id)?;

        match tx.status {
            WithdrawalStatus::Confirmed => {
                return Ok(PollOutcome {
                    transaction: tx,
                    refunded: false,
                    message: None,
                });
            }
            WithdrawalStatus::Failed => {
                return Ok(PollOutcome {
                    transaction: tx,
                    refunded: true,
                    message: Some("reservation was released back to the session".to_string()),
                });
            }
            WithdrawalStatus::PendingApproval => {
                return Ok(PollOutcome {
                    transaction: tx,
                    refunded: false,
                    message: Some("awaiting manual approval".to_string()),
                });
            }
            WithdrawalStatus::Pending => {}
        }

        let Some(operation_id) = tx.operation_id.clone() else {
            // Reserved but never submitted: a crash between phases. Left for
            // the reconciler / operators; guessing here could double-spend.
            return Ok(PollOutcome {
                transaction: tx,
                refunded: false,
                message: Some("submission state unknown; reconciliation required".to_string()),
            });
        };

        let status = match self
            .submitter
            .get_operation_status(&operation_id, tx.network)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(tx_id = %tx.id, error = %e, "settlement node unreachable during poll");
                return Ok(PollOutcome {
                    transaction: tx,
                    refunded: false,
                    message: Some(format!(
                        "settlement node unreachable; operation still pending: {}",
                        e
                    )),
                });
            }
        };

        match status {
            OperationStatus::Queued | OperationStatus::Executing => Ok(PollOutcome {
                transaction: tx,
                refunded: false,
                message: None,
            }),
            OperationStatus::Success { txid } => self.confirm_transaction(tx, txid).await,
            OperationStatus::Failed { fault } => self.resolve_failure(tx, fault).await,
        }
    }

    /// Mark a settled operation confirmed. The reservation becomes permanent;
    /// no ledger call is made.
    async fn confirm_transaction(
        &self,
        tx: WithdrawalTransaction,
        txid: String,
    ) -> CashierResult<PollOutcome> {
        let guard = self.ledger.lock_session(&tx.session_id).await;
        let mut current = self.get_transaction(&tx.id)?;
        if current.status.is_terminal() {
            drop(guard);
            return self.poll_resolved(current);
        }

        current.status = WithdrawalStatus::Confirmed;
        current.tx_hash = Some(txid.clone());
        current.confirmed_at = Some(now_secs());
        store::store_transaction(&self.storage, &current)?;
        drop(guard);

        self.audit.record(AuditEvent::WithdrawalConfirmed {
            session_id: current.session_id.clone(),
            transaction_id: current.id.clone(),
            tx_hash: txid,
        });
        tracing::info!(tx_id = %current.id, "withdrawal confirmed on settlement network");

        Ok(PollOutcome {
            transaction: current,
            refunded: false,
            message: None,
        })
    }

    /// Apply the retry policy to a failed operation: resubmit with an
    /// escalated fee, or release the reservation exactly once.
    async fn resolve_failure(
        &self,
        tx: WithdrawalTransaction,
        fault: SettlementFault,
    ) -> CashierResult<PollOutcome> {
        let decision = retry::decide(
            fault.kind,
            tx.retry_attempt,
            self.withdrawal_cfg.max_retry_attempts,
            tx.fee,
        );

        match decision {
            RetryDecision::Retry { attempt, fee } => self.resubmit(tx, fault, attempt, fee).await,
            RetryDecision::Fail => self.release_failed(tx, fault).await,
        }
    }

    async fn resubmit(
        &self,
        tx: WithdrawalTransaction,
        fault: SettlementFault,
        attempt: u32,
        fee: u64,
    ) -> CashierResult<PollOutcome> {
        let send = SendRequest {
            source: self.settlement_cfg.house_wallet(tx.network).to_string(),
            destination: tx.destination_address.clone(),
            amount: tx.amount,
            memo: format!("wd:{}:retry:{}", tx.id, attempt),
            network: tx.network,
            attempt,
            fee_override: Some(fee),
        };

        let submitted = match self.submitter.submit_send(send).await {
            Ok(submitted) => submitted,
            Err(e) => {
                // Unknown outcome on the old operation, no new one created.
                // Leave the row untouched; the next poll retries the decision.
                tracing::warn!(tx_id = %tx.id, error = %e, "retry submission failed; keeping row pending");
                return Ok(PollOutcome {
                    transaction: tx,
                    refunded: false,
                    message: Some("retry submission deferred; settlement node unreachable".to_string()),
                });
            }
        };

        let guard = self.ledger.lock_session(&tx.session_id).await;
        let mut current = self.get_transaction(&tx.id)?;
        if current.status.is_terminal() {
            drop(guard);
            return self.poll_resolved(current);
        }

        current.operation_id = Some(submitted.operation_id);
        current.retry_attempt = attempt;
        current.last_error = Some(fault);
        store::store_transaction(&self.storage, &current)?;
        drop(guard);

        tracing::info!(
            tx_id = %current.id,
            attempt,
            fee,
            "withdrawal resubmitted with escalated fee"
        );

        Ok(PollOutcome {
            transaction: current,
            refunded: false,
            message: Some(format!("resubmitted with escalated fee (attempt {})", attempt)),
        })
    }

    /// Terminal failure: release `amount + fee`, take back the lifetime
    /// withdrawn counter, mark the row failed. Idempotent under racing polls
    /// because the status is re-checked inside the session lock.
    async fn release_failed(
        &self,
        tx: WithdrawalTransaction,
        fault: SettlementFault,
    ) -> CashierResult<PollOutcome> {
        let guard = self.ledger.lock_session(&tx.session_id).await;
        let mut current = self.get_transaction(&tx.id)?;
        if current.status.is_terminal() {
            drop(guard);
            return self.poll_resolved(current);
        }

        current.status = WithdrawalStatus::Failed;
        current.last_error = Some(fault.clone());

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
            reason: fault.message.clone(),
        });
        tracing::warn!(
            tx_id = %current.id,
            fault = ?fault.kind,
            "withdrawal failed terminally; reservation released"
        );

        Ok(PollOutcome {
            transaction: current,
            refunded: true,
            message: Some("reservation was released back to the session".to_string()),
        })
    }

    /// View for a row that reached a terminal state through another caller
    fn poll_resolved(&self, tx: WithdrawalTransaction) -> CashierResult<PollOutcome> {
        let refunded = tx.status == WithdrawalStatus::Failed;
        Ok(PollOutcome {
            transaction: tx,
            refunded,
            message: None,
        })
    }

    /// Sweep every in-flight row through the poller. Externally triggered;
    /// picks up operations stranded by crashes between reservation and
    /// confirmation.
    pub async fn reconcile_pending(&self) -> CashierResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let (rows, next) =
                store::list_pending_submissions(&self.storage, cursor.as_deref(), 100)?;
            if rows.is_empty() {
                break;
            }
            for row in rows {
                report.scanned += 1;
                let outcome = self.poll_transaction(&row.id).await?;
                match outcome.transaction.status {
                    WithdrawalStatus::Confirmed => report.confirmed += 1,
                    WithdrawalStatus::Failed => report.failed += 1,
                    _ if outcome.transaction.retry_attempt > row.retry_attempt => {
                        report.retried += 1
                    }
                    _ => report.still_pending += 1,
                }
            }
            cursor = next;
            if cursor.is_none() {
                break;
            }
        }

        tracing::info!(
            scanned = report.scanned,
            confirmed = report.confirmed,
            failed = report.failed,
            retried = report.retried,
            still_pending = report.still_pending,
            "reconciliation sweep finished"
        );
        Ok(report)
    }
}

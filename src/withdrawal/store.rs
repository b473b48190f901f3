//! Persistent withdrawal rows and their indexes
//!
//! Layout mirrors the rest of the storage layer: prefixed keys, serde_json
//! values, batch writes. Three key families:
//!
//! - `withdrawal:tx:<id>` is the transaction row itself
//! - `withdrawal:idem:<session>:<key>` is the idempotency index (value = tx id)
//! - `withdrawal:pending:<id>` / `withdrawal:approval:<id>` are status markers
//!
//! Status markers are advisory: scans load the full row and filter on its
//! actual status, so a stale marker is skipped (and cleaned up best-effort)
//! rather than trusted.

use crate::errors::{CashierResult, StorageError};
use crate::storage::CashierStorage;
use crate::withdrawal::types::{WithdrawalStatus, WithdrawalTransaction};

const TX_PREFIX: &str = "withdrawal:tx:";
const IDEM_PREFIX: &str = "withdrawal:idem:";
const PENDING_PREFIX: &[u8] = b"withdrawal:pending:";
const APPROVAL_PREFIX: &[u8] = b"withdrawal:approval:";

fn tx_key(id: &str) -> Vec<u8> {
    format!("{}{}", TX_PREFIX, id).into_bytes()
}

fn idem_key(session_id: &str, idempotency_key: &str) -> Vec<u8> {
    format!("{}{}:{}", IDEM_PREFIX, session_id, idempotency_key).into_bytes()
}

fn pending_key(id: &str) -> Vec<u8> {
    let mut key = PENDING_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn approval_key(id: &str) -> Vec<u8> {
    let mut key = APPROVAL_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn encode_row(tx: &WithdrawalTransaction) -> CashierResult<Vec<u8>> {
    serde_json::to_vec(tx).map_err(|e| {
        StorageError::WriteFailed(format!("Failed to encode withdrawal {}: {}", tx.id, e)).into()
    })
}

fn status_marker(tx: &WithdrawalTransaction) -> Option<Vec<u8>> {
    match tx.status {
        WithdrawalStatus::Pending => Some(pending_key(&tx.id)),
        WithdrawalStatus::PendingApproval => Some(approval_key(&tx.id)),
        _ => None,
    }
}

/// Batch rows for creating a transaction together with its reservation.
/// Passed to `Ledger::reserve_funds` so the row, the idempotency index and
/// the account mutation commit as one unit.
pub fn creation_rows(tx: &WithdrawalTransaction) -> CashierResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut rows = vec![
        (tx_key(&tx.id), encode_row(tx)?),
        (
            idem_key(&tx.session_id, &tx.idempotency_key),
            tx.id.as_bytes().to_vec(),
        ),
    ];
    if let Some(marker) = status_marker(tx) {
        rows.push((marker, Vec::new()));
    }
    Ok(rows)
}

/// Batch rows for a status transition, for callers that combine the row
/// update with a ledger release in one batch.
pub fn update_rows(tx: &WithdrawalTransaction) -> CashierResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut rows = vec![(tx_key(&tx.id), encode_row(tx)?)];
    if let Some(marker) = status_marker(tx) {
        rows.push((marker, Vec::new()));
    }
    Ok(rows)
}

/// Persist a transaction row and maintain its status markers
pub fn store_transaction(storage: &CashierStorage, tx: &WithdrawalTransaction) -> CashierResult<()> {
    storage.batch_write(&update_rows(tx)?)?;
    cleanup_markers(storage, tx);
    Ok(())
}

/// Drop markers that no longer match the row's status. Best-effort: a
/// leftover marker is filtered out at scan time anyway.
pub fn cleanup_markers(storage: &CashierStorage, tx: &WithdrawalTransaction) {
    if tx.status != WithdrawalStatus::Pending {
        storage.delete(&pending_key(&tx.id)).ok();
    }
    if tx.status != WithdrawalStatus::PendingApproval {
        storage.delete(&approval_key(&tx.id)).ok();
    }
}

pub fn load_transaction(
    storage: &CashierStorage,
    id: &str,
) -> CashierResult<Option<WithdrawalTransaction>> {
    let Some(bytes) = storage.get(&tx_key(id)) else {
        return Ok(None);
    };
    let tx: WithdrawalTransaction = serde_json::from_slice(&bytes).map_err(|e| {
        StorageError::CorruptedData(format!("Failed to decode withdrawal {}: {}", id, e))
    })?;
    Ok(Some(tx))
}

/// Look up a prior transaction for this (session, idempotency key) pair
pub fn load_by_idempotency(
    storage: &CashierStorage,
    session_id: &str,
    idempotency_key: &str,
) -> CashierResult<Option<WithdrawalTransaction>> {
    let Some(id_bytes) = storage.get(&idem_key(session_id, idempotency_key)) else {
        return Ok(None);
    };
    let id = String::from_utf8(id_bytes).map_err(|_| {
        StorageError::CorruptedData(format!(
            "Invalid idempotency index entry for session {}",
            session_id
        ))
    })?;
    load_transaction(storage, &id)
}

fn scan_status(
    storage: &CashierStorage,
    prefix: &[u8],
    want: WithdrawalStatus,
    cursor_hex: Option<&str>,
    limit: usize,
) -> CashierResult<(Vec<WithdrawalTransaction>, Option<String>)> {
    let cursor_bytes = match cursor_hex {
        Some(c) => Some(hex::decode(c).map_err(|e| {
            StorageError::CorruptedData(format!("Invalid cursor hex: {}", e))
        })?),
        None => None,
    };

    // Over-scan to absorb stale markers without shrinking the page.
    let scan_limit = (limit * 4).max(32);
    let rows = storage.scan_prefix(prefix, cursor_bytes.as_deref(), scan_limit);

    let mut matches = Vec::new();
    let mut next_cursor = None;
    let mut stale = 0usize;

    for (key, _value) in rows {
        if matches.len() >= limit {
            break;
        }
        let id = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
        match load_transaction(storage, &id)? {
            Some(tx) if tx.status == want => matches.push(tx),
            Some(tx) => {
                stale += 1;
                cleanup_markers(storage, &tx);
            }
            None => {
                tracing::warn!(tx_id = %id, "status marker points at a missing withdrawal row");
                stale += 1;
            }
        }
        next_cursor = Some(hex::encode(&key));
    }

    if stale > 0 {
        tracing::debug!(stale, status = %want, "skipped stale status markers during scan");
    }

    let final_cursor = if matches.len() >= limit {
        next_cursor
    } else {
        None
    };
    Ok((matches, final_cursor))
}

/// Transactions awaiting manual approval, cursor-paginated
pub fn list_pending_approval(
    storage: &CashierStorage,
    cursor_hex: Option<&str>,
    limit: usize,
) -> CashierResult<(Vec<WithdrawalTransaction>, Option<String>)> {
    scan_status(
        storage,
        APPROVAL_PREFIX,
        WithdrawalStatus::PendingApproval,
        cursor_hex,
        limit,
    )
}

/// Transactions with an in-flight settlement operation, cursor-paginated.
/// This is the reconciliation sweep's work list.
pub fn list_pending_submissions(
    storage: &CashierStorage,
    cursor_hex: Option<&str>,
    limit: usize,
) -> CashierResult<(Vec<WithdrawalTransaction>, Option<String>)> {
    scan_status(
        storage,
        PENDING_PREFIX,
        WithdrawalStatus::Pending,
        cursor_hex,
        limit,
    )
}

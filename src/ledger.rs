//! Session accounts and atomic balance operations
//!
//! The session account row is the single source of truth for spendable
//! funds. Every mutation happens under that session's lock and lands in one
//! RocksDB write batch, so concurrent withdraw/credit/release calls against
//! the same session serialize and never observe a torn balance.
//!
//! Callers that need to persist additional rows in the same atomic unit
//! (e.g. a withdrawal transaction created together with its reservation)
//! pass them as extra batch items. External I/O is never performed while a
//! session guard is held: the pattern is mutate-then-call.

use crate::errors::{CashierError, CashierResult, StorageError};
use crate::storage::CashierStorage;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard};

const SESSION_PREFIX: &str = "session:account:";

/// Player session account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionAccount {
    pub session_id: String,
    /// Spendable balance in minor units; never negative
    pub balance: u64,
    /// Lifetime credited amount (deposits, game winnings)
    pub total_credited: u64,
    /// Lifetime withdrawn amount; incremented on reservation, decremented on refund
    pub total_withdrawn: u64,
    pub is_authenticated: bool,
    pub is_demo: bool,
    /// Withdrawals may only target this address (demo accounts excepted)
    pub withdrawal_address: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SessionAccount {
    pub fn new(session_id: String) -> Self {
        let now = now_secs();
        Self {
            session_id,
            balance: 0,
            total_credited: 0,
            total_withdrawn: 0,
            is_authenticated: false,
            is_demo: false,
            withdrawal_address: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Which lifetime counter an operation adjusts alongside the balance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifetimeCounter {
    TotalWithdrawn,
    TotalCredited,
}

/// Proof that the caller holds the per-session lock.
///
/// Ledger mutations demand one of these so the reserve/release/credit call
/// and any read-modify-write around it (idempotency checks, status guards)
/// happen inside the same critical section.
pub struct SessionGuard {
    session_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Atomic balance operations over persisted session accounts
#[derive(Clone)]
pub struct Ledger {
    storage: CashierStorage,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(storage: CashierStorage) -> Self {
        Self {
            storage,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquire the per-session lock. All mutations for this session are
    /// serialized behind it.
    pub async fn lock_session(&self, session_id: &str) -> SessionGuard {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SessionGuard {
            session_id: session_id.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    fn session_key(session_id: &str) -> Vec<u8> {
        format!("{}{}", SESSION_PREFIX, session_id).into_bytes()
    }

    /// Load a session account, if it exists
    pub fn load_session(&self, session_id: &str) -> CashierResult<Option<SessionAccount>> {
        let Some(bytes) = self.storage.get(&Self::session_key(session_id)) else {
            return Ok(None);
        };
        let account: SessionAccount = serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::CorruptedData(format!(
                "Failed to decode session account {}: {}",
                session_id, e
            ))
        })?;
        Ok(Some(account))
    }

    /// Load a session account or fail with NotFound
    pub fn get_session(&self, session_id: &str) -> CashierResult<SessionAccount> {
        self.load_session(session_id)?
            .ok_or_else(|| CashierError::NotFound(format!("session {}", session_id)))
    }

    /// Persist a session account row
    pub fn put_session(&self, account: &SessionAccount) -> CashierResult<()> {
        let bytes = serde_json::to_vec(account).map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to encode session account {}: {}",
                account.session_id, e
            ))
        })?;
        self.storage.put(&Self::session_key(account.session_id.as_str()), &bytes)?;
        Ok(())
    }

    /// Atomically check `balance >= total_amount`, decrement the balance and
    /// increment the named lifetime counter. `extra_rows` land in the same
    /// write batch as the account row.
    pub fn reserve_funds(
        &self,
        guard: &SessionGuard,
        total_amount: u64,
        counter: LifetimeCounter,
        counter_amount: u64,
        extra_rows: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> CashierResult<SessionAccount> {
        let mut account = self.get_session(guard.session_id())?;

        if account.balance < total_amount {
            return Err(CashierError::InsufficientBalance {
                required: total_amount,
                available: account.balance,
            });
        }

        account.balance -= total_amount;
        Self::bump_counter(&mut account, counter, counter_amount as i64)?;
        account.updated_at = now_secs();

        self.write_account_batch(&account, extra_rows)?;
        Ok(account)
    }

    /// Exact inverse of `reserve_funds`; used only for refunds.
    pub fn release_funds(
        &self,
        guard: &SessionGuard,
        total_amount: u64,
        counter: LifetimeCounter,
        counter_amount: u64,
        extra_rows: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> CashierResult<SessionAccount> {
        let mut account = self.get_session(guard.session_id())?;

        account.balance = account.balance.checked_add(total_amount).ok_or_else(|| {
            StorageError::CorruptedData(format!(
                "balance overflow releasing {} units for session {}",
                total_amount,
                guard.session_id()
            ))
        })?;
        Self::bump_counter(&mut account, counter, -(counter_amount as i64))?;
        account.updated_at = now_secs();

        self.write_account_batch(&account, extra_rows)?;
        Ok(account)
    }

    /// Increment the balance (deposits and game payouts use this primitive)
    pub async fn credit_funds(
        &self,
        session_id: &str,
        amount: u64,
        counter: LifetimeCounter,
        counter_amount: u64,
    ) -> CashierResult<SessionAccount> {
        let guard = self.lock_session(session_id).await;
        let mut account = self.get_session(guard.session_id())?;

        account.balance = account.balance.checked_add(amount).ok_or_else(|| {
            StorageError::CorruptedData(format!(
                "balance overflow crediting {} units for session {}",
                amount, session_id
            ))
        })?;
        Self::bump_counter(&mut account, counter, counter_amount as i64)?;
        account.updated_at = now_secs();

        self.write_account_batch(&account, Vec::new())?;
        Ok(account)
    }

    fn bump_counter(
        account: &mut SessionAccount,
        counter: LifetimeCounter,
        delta: i64,
    ) -> CashierResult<()> {
        let field = match counter {
            LifetimeCounter::TotalWithdrawn => &mut account.total_withdrawn,
            LifetimeCounter::TotalCredited => &mut account.total_credited,
        };
        let next = (*field as i64).checked_add(delta).filter(|v| *v >= 0);
        match next {
            Some(v) => {
                *field = v as u64;
                Ok(())
            }
            None => Err(CashierError::Storage(StorageError::CorruptedData(format!(
                "lifetime counter underflow for session {} (delta {})",
                account.session_id, delta
            )))),
        }
    }

    fn write_account_batch(
        &self,
        account: &SessionAccount,
        mut extra_rows: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> CashierResult<()> {
        let bytes = serde_json::to_vec(account).map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to encode session account {}: {}",
                account.session_id, e
            ))
        })?;
        let mut items = vec![(Self::session_key(&account.session_id), bytes)];
        items.append(&mut extra_rows);
        self.storage.batch_write(&items)?;
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_ledger() -> (TempDir, Ledger) {
        let dir = TempDir::new().expect("temp dir");
        let storage = CashierStorage::new(dir.path()).expect("open");
        (dir, Ledger::new(storage))
    }

    async fn seed_session(ledger: &Ledger, id: &str, balance: u64) -> SessionAccount {
        let mut account = SessionAccount::new(id.to_string());
        account.is_authenticated = true;
        ledger.put_session(&account).unwrap();
        if balance > 0 {
            ledger
                .credit_funds(id, balance, LifetimeCounter::TotalCredited, balance)
                .await
                .unwrap()
        } else {
            account
        }
    }

    #[tokio::test]
    async fn test_reserve_then_release_round_trips_exactly() {
        let (_dir, ledger) = test_ledger();
        seed_session(&ledger, "s1", 10_000).await;

        let guard = ledger.lock_session("s1").await;
        let reserved = ledger
            .reserve_funds(&guard, 5_000, LifetimeCounter::TotalWithdrawn, 4_999, Vec::new())
            .unwrap();
        assert_eq!(reserved.balance, 5_000);
        assert_eq!(reserved.total_withdrawn, 4_999);

        let released = ledger
            .release_funds(&guard, 5_000, LifetimeCounter::TotalWithdrawn, 4_999, Vec::new())
            .unwrap();
        assert_eq!(released.balance, 10_000);
        assert_eq!(released.total_withdrawn, 0);
        assert_eq!(released.total_credited, 10_000);
    }

    #[tokio::test]
    async fn test_reserve_rejects_insufficient_balance() {
        let (_dir, ledger) = test_ledger();
        seed_session(&ledger, "s1", 5_500).await;

        let guard = ledger.lock_session("s1").await;
        let err = ledger
            .reserve_funds(&guard, 5_501, LifetimeCounter::TotalWithdrawn, 5_500, Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            CashierError::InsufficientBalance {
                required: 5_501,
                available: 5_500
            }
        ));

        // Balance untouched by the failed reservation
        let account = ledger.get_session("s1").unwrap();
        assert_eq!(account.balance, 5_500);
    }

    #[tokio::test]
    async fn test_extra_rows_land_in_same_batch() {
        let (_dir, ledger) = test_ledger();
        seed_session(&ledger, "s1", 1_000).await;

        let guard = ledger.lock_session("s1").await;
        ledger
            .reserve_funds(
                &guard,
                100,
                LifetimeCounter::TotalWithdrawn,
                99,
                vec![(b"tx:row:1".to_vec(), b"{}".to_vec())],
            )
            .unwrap();
        drop(guard);

        assert_eq!(ledger.storage.get(b"tx:row:1"), Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_counter_underflow_is_rejected() {
        let (_dir, ledger) = test_ledger();
        seed_session(&ledger, "s1", 1_000).await;

        let guard = ledger.lock_session("s1").await;
        let err = ledger
            .release_funds(&guard, 10, LifetimeCounter::TotalWithdrawn, 5, Vec::new())
            .unwrap_err();
        assert!(matches!(err, CashierError::Storage(_)));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_serialize() {
        let (_dir, ledger) = test_ledger();
        seed_session(&ledger, "s1", 1_000).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let guard = ledger.lock_session("s1").await;
                ledger
                    .reserve_funds(&guard, 150, LifetimeCounter::TotalWithdrawn, 150, Vec::new())
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        // 1_000 / 150 = 6 reservations fit; the rest must be rejected.
        assert_eq!(successes, 6);
        let account = ledger.get_session("s1").unwrap();
        assert_eq!(account.balance, 1_000 - 6 * 150);
    }
}

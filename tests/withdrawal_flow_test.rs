//! End-to-end withdrawal flows against a real RocksDB directory
//! Validates the conservation invariant and that engine state survives restarts

use cashier::config::{SettlementConfig, WithdrawalConfig};
use cashier::hooks::{AllowAllLimiter, FlagKillSwitch, TracingAuditLog};
use cashier::ledger::{Ledger, LifetimeCounter, SessionAccount};
use cashier::settlement::simulated::{SimulatedNode, SimulatedNodeConfig};
use cashier::storage::CashierStorage;
use cashier::withdrawal::handler::WithdrawRequest;
use cashier::withdrawal::store;
use cashier::withdrawal::types::WithdrawalStatus;
use cashier::withdrawal::WithdrawalEngine;
use std::path::Path;
use std::sync::Arc;

fn build_engine(
    db_path: &Path,
    withdrawal_cfg: WithdrawalConfig,
) -> (WithdrawalEngine, Arc<SimulatedNode>) {
    let storage = CashierStorage::new(db_path).expect("open storage");
    let ledger = Ledger::new(storage.clone());
    let settlement_cfg = SettlementConfig::default();

    let node = Arc::new(SimulatedNode::new(SimulatedNodeConfig::default()));
    node.fund_source(
        settlement_cfg.network,
        settlement_cfg.house_wallet(settlement_cfg.network),
        10_000_000,
    );

    let engine = WithdrawalEngine::new(
        storage,
        ledger,
        node.clone(),
        withdrawal_cfg,
        settlement_cfg,
        Arc::new(FlagKillSwitch::new(false)),
        Arc::new(AllowAllLimiter),
        Arc::new(TracingAuditLog),
    );
    (engine, node)
}

async fn seed_session(engine: &WithdrawalEngine, id: &str, balance: u64) {
    let mut account = SessionAccount::new(id.to_string());
    account.is_authenticated = true;
    account.withdrawal_address = Some("tw1qplayer0000000000000000000000000".to_string());
    engine.ledger().put_session(&account).expect("seed session");
    engine
        .ledger()
        .credit_funds(id, balance, LifetimeCounter::TotalCredited, balance)
        .await
        .expect("credit");
}

fn withdraw(session: &str, amount: u64, key: &str) -> WithdrawRequest {
    WithdrawRequest {
        session_id: session.to_string(),
        amount,
        idempotency_key: key.to_string(),
    }
}

/// For every reachable state: balance plus the claims of non-terminal rows
/// equals lifetime credited minus lifetime confirmed-withdrawn.
async fn assert_conservation(engine: &WithdrawalEngine, session_id: &str, tx_ids: &[String]) {
    let account = engine.ledger().get_session(session_id).unwrap();

    let mut reserved_in_flight = 0u64;
    let mut confirmed_withdrawn = 0u64;
    for id in tx_ids {
        let tx = engine.get_transaction(id).unwrap();
        match tx.status {
            WithdrawalStatus::Pending | WithdrawalStatus::PendingApproval => {
                reserved_in_flight += tx.amount + tx.fee;
            }
            WithdrawalStatus::Confirmed => confirmed_withdrawn += tx.amount + tx.fee,
            WithdrawalStatus::Failed => {}
        }
    }

    assert_eq!(
        account.balance + reserved_in_flight,
        account.total_credited - confirmed_withdrawn,
        "conservation violated for session {}",
        session_id
    );
}

#[tokio::test]
async fn test_full_lifecycle_preserves_conservation() {
    let dir = tempfile::TempDir::new().unwrap();
    let (engine, node) = build_engine(dir.path(), WithdrawalConfig::default());
    seed_session(&engine, "s1", 100_000).await;

    let mut tx_ids = Vec::new();

    // One withdrawal that will confirm
    let ok = engine
        .request_withdrawal(withdraw("s1", 20_000, "ok"))
        .await
        .unwrap();
    tx_ids.push(ok.id.clone());

    // One that will fail terminally and refund
    node.fail_next_submission("invalid destination address");
    let doomed = engine
        .request_withdrawal(withdraw("s1", 5_000, "doomed"))
        .await
        .unwrap();
    tx_ids.push(doomed.id.clone());

    // One that stays in flight
    let parked = engine
        .request_withdrawal(withdraw("s1", 1_000, "parked"))
        .await
        .unwrap();
    tx_ids.push(parked.id.clone());

    assert_conservation(&engine, "s1", &tx_ids).await;

    let confirmed = engine.poll_transaction(&ok.id).await.unwrap();
    assert_eq!(confirmed.transaction.status, WithdrawalStatus::Confirmed);
    assert_conservation(&engine, "s1", &tx_ids).await;

    let failed = engine.poll_transaction(&doomed.id).await.unwrap();
    assert_eq!(failed.transaction.status, WithdrawalStatus::Failed);
    assert!(failed.refunded);
    assert_conservation(&engine, "s1", &tx_ids).await;

    // Double-resolving the failed row must not release twice
    let again = engine.poll_transaction(&doomed.id).await.unwrap();
    assert!(again.refunded);
    assert_conservation(&engine, "s1", &tx_ids).await;

    let account = engine.ledger().get_session("s1").unwrap();
    // 100_000 - (20_000 + 1) confirmed - (1_000 + 1) still reserved
    assert_eq!(account.balance, 100_000 - 20_001 - 1_001);
    assert_eq!(account.total_withdrawn, 20_000 + 1_000);
}

#[tokio::test]
async fn test_in_flight_withdrawal_survives_restart_without_false_refund() {
    let dir = tempfile::TempDir::new().unwrap();

    let tx_id = {
        let (engine, _node) = build_engine(dir.path(), WithdrawalConfig::default());
        seed_session(&engine, "s1", 10_000).await;
        let tx = engine
            .request_withdrawal(withdraw("s1", 4_999, "k1"))
            .await
            .unwrap();
        assert_eq!(tx.status, WithdrawalStatus::Pending);
        tx.id
        // Engine and storage drop here, releasing the DB lock
    };

    // Restart on the same directory with a fresh settlement node that has
    // never heard of the in-flight operation.
    let (engine, _node) = build_engine(dir.path(), WithdrawalConfig::default());

    let account = engine.ledger().get_session("s1").unwrap();
    assert_eq!(account.balance, 10_000 - 5_000);

    // The node cannot answer for the unknown operation; the row must stay
    // pending and nothing may be refunded.
    let outcome = engine.poll_transaction(&tx_id).await.unwrap();
    assert_eq!(outcome.transaction.status, WithdrawalStatus::Pending);
    assert!(!outcome.refunded);

    let account = engine.ledger().get_session("s1").unwrap();
    assert_eq!(account.balance, 10_000 - 5_000);

    // The reconcile sweep still sees it as in-flight work.
    let report = engine.reconcile_pending().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.still_pending, 1);
}

#[tokio::test]
async fn test_approval_gate_round_trip_through_persistence() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = WithdrawalConfig {
        approval_threshold: 10_000,
        ..Default::default()
    };
    let (engine, node) = build_engine(dir.path(), config);
    seed_session(&engine, "s1", 50_000).await;

    let parked = engine
        .request_withdrawal(withdraw("s1", 15_000, "big"))
        .await
        .unwrap();
    assert_eq!(parked.status, WithdrawalStatus::PendingApproval);
    assert_eq!(node.submission_count(), 0);

    // Visible in the operator queue
    let (queue, _) = store::list_pending_approval(engine.storage(), None, 10).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, parked.id);

    let approved = engine.approve_withdrawal(&parked.id).await.unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Pending);
    assert_eq!(node.submission_count(), 1);

    let outcome = engine.poll_transaction(&parked.id).await.unwrap();
    assert_eq!(outcome.transaction.status, WithdrawalStatus::Confirmed);

    // Queue is empty again
    let (queue, _) = store::list_pending_approval(engine.storage(), None, 10).unwrap();
    assert!(queue.is_empty());

    let account = engine.ledger().get_session("s1").unwrap();
    assert_eq!(account.balance, 50_000 - 15_001);
    assert_eq!(account.total_withdrawn, 15_000);
}

#[tokio::test]
async fn test_duplicate_requests_across_restart_stay_deduplicated() {
    let dir = tempfile::TempDir::new().unwrap();

    let first_id = {
        let (engine, _node) = build_engine(dir.path(), WithdrawalConfig::default());
        seed_session(&engine, "s1", 10_000).await;
        engine
            .request_withdrawal(withdraw("s1", 1_000, "dup"))
            .await
            .unwrap()
            .id
    };

    let (engine, _node) = build_engine(dir.path(), WithdrawalConfig::default());
    let replay = engine
        .request_withdrawal(withdraw("s1", 1_000, "dup"))
        .await
        .unwrap();
    assert_eq!(replay.id, first_id);

    let account = engine.ledger().get_session("s1").unwrap();
    assert_eq!(account.balance, 10_000 - 1_001);
}

//! Shared fixtures for withdrawal engine tests

use crate::config::{SettlementConfig, WithdrawalConfig};
use crate::hooks::{AllowAllLimiter, FlagKillSwitch, TracingAuditLog};
use crate::ledger::{Ledger, LifetimeCounter, SessionAccount};
use crate::settlement::simulated::{SimulatedNode, SimulatedNodeConfig};
use crate::storage::CashierStorage;
use crate::withdrawal::WithdrawalEngine;
use std::sync::Arc;
use tempfile::TempDir;

pub(crate) struct TestHarness {
    pub _dir: TempDir,
    pub engine: WithdrawalEngine,
    pub node: Arc<SimulatedNode>,
    pub kill_switch: Arc<FlagKillSwitch>,
}

pub(crate) fn harness(withdrawal_cfg: WithdrawalConfig) -> TestHarness {
    let dir = TempDir::new().expect("temp dir");
    let storage = CashierStorage::new(dir.path()).expect("open");
    let ledger = Ledger::new(storage.clone());
    let node = Arc::new(SimulatedNode::new(SimulatedNodeConfig::default()));
    let settlement_cfg = SettlementConfig::default();
    node.fund_source(
        settlement_cfg.network,
        settlement_cfg.house_wallet(settlement_cfg.network),
        1_000_000,
    );
    let kill_switch = Arc::new(FlagKillSwitch::new(false));

    let engine = WithdrawalEngine::new(
        storage,
        ledger,
        node.clone(),
        withdrawal_cfg,
        settlement_cfg,
        kill_switch.clone(),
        Arc::new(AllowAllLimiter),
        Arc::new(TracingAuditLog),
    );
    TestHarness {
        _dir: dir,
        engine,
        node,
        kill_switch,
    }
}

/// Authenticated session with a registered testnet address and a funded balance
pub(crate) async fn seed_player(
    engine: &WithdrawalEngine,
    id: &str,
    balance: u64,
) -> SessionAccount {
    let mut account = SessionAccount::new(id.to_string());
    account.is_authenticated = true;
    account.withdrawal_address = Some("tw1qplayer0000000000000000000000000".to_string());
    engine.ledger.put_session(&account).unwrap();
    engine
        .ledger
        .credit_funds(id, balance, LifetimeCounter::TotalCredited, balance)
        .await
        .unwrap()
}

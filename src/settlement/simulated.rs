//! In-process simulated settlement node
//!
//! Backs the testnet deployment and the test suite. Operations move through
//! queued -> executing -> success on successive polls unless a fault has
//! been scripted, and the whole node can be flipped unreachable to exercise
//! the unknown-outcome paths.

use super::{
    ChecksumCheck, NodeStatus, OperationStatus, SendRequest, SettlementFault, SettlementSubmitter,
    SourceBalance, SubmittedOperation, SubmitterError,
};
use crate::config::Network;
use crate::settlement::address_format_ok;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Tuning for the simulated node
#[derive(Clone, Debug)]
pub struct SimulatedNodeConfig {
    /// Polls an operation spends in queued/executing before success
    pub confirm_after_polls: u32,
    /// Base artificial latency per submission, milliseconds
    pub submit_delay_ms: u64,
    /// Random extra latency bound, milliseconds
    pub jitter_ms: u64,
}

impl Default for SimulatedNodeConfig {
    fn default() -> Self {
        Self {
            confirm_after_polls: 1,
            submit_delay_ms: 0,
            jitter_ms: 0,
        }
    }
}

struct SimulatedOperation {
    request: SendRequest,
    polls: u32,
    forced_fault: Option<String>,
}

/// Simulated settlement node
pub struct SimulatedNode {
    config: SimulatedNodeConfig,
    ops: DashMap<String, SimulatedOperation>,
    /// Liquid balance per (network, address)
    balances: DashMap<(Network, String), u64>,
    unreachable: AtomicBool,
    synced: AtomicBool,
    /// Raw node errors to attach to upcoming submissions, FIFO
    scripted_faults: Mutex<Vec<String>>,
}

impl SimulatedNode {
    pub fn new(config: SimulatedNodeConfig) -> Self {
        Self {
            config,
            ops: DashMap::new(),
            balances: DashMap::new(),
            unreachable: AtomicBool::new(false),
            synced: AtomicBool::new(true),
            scripted_faults: Mutex::new(Vec::new()),
        }
    }

    /// Seed the liquid balance of a wallet
    pub fn fund_source(&self, network: Network, address: &str, amount: u64) {
        self.balances.insert((network, address.to_string()), amount);
    }

    /// Flip the whole node unreachable (every call errors)
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Mark the node as (de)synced without taking it offline
    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    /// Queue a raw node error for the next submitted operation's polls
    pub fn fail_next_submission(&self, raw_error: &str) {
        self.scripted_faults
            .lock()
            .unwrap()
            .push(raw_error.to_string());
    }

    /// Force an already-submitted operation to report a failure
    pub fn fail_operation(&self, operation_id: &str, raw_error: &str) {
        if let Some(mut op) = self.ops.get_mut(operation_id) {
            op.forced_fault = Some(raw_error.to_string());
        }
    }

    /// Number of submissions this node has accepted
    pub fn submission_count(&self) -> usize {
        self.ops.len()
    }

    fn check_reachable(&self) -> Result<(), SubmitterError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(SubmitterError::Unreachable(
                "simulated node offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn txid_for(operation_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(operation_id.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl SettlementSubmitter for SimulatedNode {
    async fn check_node_status(&self, _network: Network) -> Result<NodeStatus, SubmitterError> {
        self.check_reachable()?;
        Ok(NodeStatus {
            connected: true,
            synced: self.synced.load(Ordering::SeqCst),
        })
    }

    async fn get_source_balance(
        &self,
        address: &str,
        network: Network,
    ) -> Result<SourceBalance, SubmitterError> {
        self.check_reachable()?;
        let confirmed = self
            .balances
            .get(&(network, address.to_string()))
            .map(|b| *b)
            .unwrap_or(0);
        Ok(SourceBalance {
            confirmed,
            pending: 0,
        })
    }

    async fn validate_address_checksum(
        &self,
        address: &str,
        network: Network,
    ) -> Result<ChecksumCheck, SubmitterError> {
        self.check_reachable()?;
        if address_format_ok(address, network) {
            Ok(ChecksumCheck {
                is_valid: true,
                error: None,
            })
        } else {
            Ok(ChecksumCheck {
                is_valid: false,
                error: Some(format!("checksum mismatch for {}", address)),
            })
        }
    }

    async fn submit_send(&self, request: SendRequest) -> Result<SubmittedOperation, SubmitterError> {
        self.check_reachable()?;

        if self.config.submit_delay_ms > 0 || self.config.jitter_ms > 0 {
            let jitter = if self.config.jitter_ms > 0 {
                rand::thread_rng().gen_range(0..self.config.jitter_ms)
            } else {
                0
            };
            tokio::time::sleep(Duration::from_millis(self.config.submit_delay_ms + jitter)).await;
        }

        let forced_fault = self.scripted_faults.lock().unwrap().pop();
        let operation_id = format!("simop-{}", Uuid::new_v4());
        self.ops.insert(
            operation_id.clone(),
            SimulatedOperation {
                request,
                polls: 0,
                forced_fault,
            },
        );
        Ok(SubmittedOperation { operation_id })
    }

    async fn get_operation_status(
        &self,
        operation_id: &str,
        _network: Network,
    ) -> Result<OperationStatus, SubmitterError> {
        self.check_reachable()?;

        let Some(mut op) = self.ops.get_mut(operation_id) else {
            return Err(SubmitterError::Protocol(format!(
                "unknown operation {}",
                operation_id
            )));
        };

        if let Some(raw) = &op.forced_fault {
            return Ok(OperationStatus::Failed {
                fault: SettlementFault::from_node_error(raw),
            });
        }

        op.polls += 1;
        if op.polls <= 1 && self.config.confirm_after_polls > 1 {
            Ok(OperationStatus::Queued)
        } else if op.polls < self.config.confirm_after_polls {
            Ok(OperationStatus::Executing)
        } else {
            // Debit the source on confirmation so repeated runs drain liquidity
            let key = (op.request.network, op.request.source.clone());
            if let Some(mut balance) = self.balances.get_mut(&key) {
                *balance = balance.saturating_sub(op.request.amount);
            }
            Ok(OperationStatus::Success {
                txid: Self::txid_for(operation_id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_request(network: Network) -> SendRequest {
        SendRequest {
            source: "tw1qhouse00000000000000000000000000".to_string(),
            destination: "tw1qplayer0000000000000000000000000".to_string(),
            amount: 5_000,
            memo: "wd-test".to_string(),
            network,
            attempt: 0,
            fee_override: None,
        }
    }

    #[tokio::test]
    async fn test_operation_confirms_after_configured_polls() {
        let node = SimulatedNode::new(SimulatedNodeConfig {
            confirm_after_polls: 3,
            ..Default::default()
        });

        let op = node.submit_send(send_request(Network::Testnet)).await.unwrap();

        let first = node
            .get_operation_status(&op.operation_id, Network::Testnet)
            .await
            .unwrap();
        assert_eq!(first, OperationStatus::Queued);

        let second = node
            .get_operation_status(&op.operation_id, Network::Testnet)
            .await
            .unwrap();
        assert_eq!(second, OperationStatus::Executing);

        let third = node
            .get_operation_status(&op.operation_id, Network::Testnet)
            .await
            .unwrap();
        assert!(matches!(third, OperationStatus::Success { .. }));
    }

    #[tokio::test]
    async fn test_scripted_fault_reaches_poller() {
        let node = SimulatedNode::new(SimulatedNodeConfig::default());
        node.fail_next_submission("unpaid action limit exceeded");

        let op = node.submit_send(send_request(Network::Testnet)).await.unwrap();
        let status = node
            .get_operation_status(&op.operation_id, Network::Testnet)
            .await
            .unwrap();

        match status {
            OperationStatus::Failed { fault } => {
                assert!(fault.kind.is_retryable());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_node_errors_every_call() {
        let node = SimulatedNode::new(SimulatedNodeConfig::default());
        node.set_unreachable(true);

        assert!(node.check_node_status(Network::Testnet).await.is_err());
        assert!(node.submit_send(send_request(Network::Testnet)).await.is_err());
    }

    #[tokio::test]
    async fn test_confirmation_debits_source_balance() {
        let node = SimulatedNode::new(SimulatedNodeConfig::default());
        let house = "tw1qhouse00000000000000000000000000";
        node.fund_source(Network::Testnet, house, 10_000);

        let op = node.submit_send(send_request(Network::Testnet)).await.unwrap();
        let status = node
            .get_operation_status(&op.operation_id, Network::Testnet)
            .await
            .unwrap();
        assert!(matches!(status, OperationStatus::Success { .. }));

        let balance = node
            .get_source_balance(house, Network::Testnet)
            .await
            .unwrap();
        assert_eq!(balance.confirmed, 5_000);
    }
}

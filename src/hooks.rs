//! Consumed collaborator interfaces
//!
//! The withdrawal engine must consult a platform kill switch, a public rate
//! limiter, and an audit sink at fixed points, but it does not own their
//! implementations. These traits are the seams; the in-crate defaults are
//! deliberately thin (an atomic flag, allow-all, a tracing target) so real
//! deployments can swap in the platform services.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Global flag that blocks new withdrawals platform-wide when active
pub trait KillSwitch: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Runtime-togglable kill switch backed by an atomic flag
#[derive(Default)]
pub struct FlagKillSwitch {
    active: AtomicBool,
}

impl FlagKillSwitch {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

impl KillSwitch for FlagKillSwitch {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Public-surface rate limiter consulted before any withdrawal work
pub trait RateLimiter: Send + Sync {
    fn allow(&self, caller: &str) -> bool;
}

/// Default limiter: admits everything. The platform edge owns real limits.
pub struct AllowAllLimiter;

impl RateLimiter for AllowAllLimiter {
    fn allow(&self, _caller: &str) -> bool {
        true
    }
}

/// Events the engine emits at financially significant points
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    WithdrawalRequested {
        session_id: String,
        transaction_id: String,
        amount: u64,
        fee: u64,
    },
    WithdrawalConfirmed {
        session_id: String,
        transaction_id: String,
        tx_hash: String,
    },
    WithdrawalFailed {
        session_id: String,
        transaction_id: String,
        reason: String,
    },
    FundsReleased {
        session_id: String,
        transaction_id: String,
        total_amount: u64,
    },
    AdminAction {
        transaction_id: String,
        action: String,
        reason: Option<String>,
    },
}

/// Audit sink consumed by the engine
pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured lines under the `audit` tracing target
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "audit", "{}", json),
            Err(e) => tracing::error!(target: "audit", "unserializable audit event: {}", e),
        }
    }
}

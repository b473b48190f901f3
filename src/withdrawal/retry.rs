//! Retry and fee-escalation policy
//!
//! Pure decision function: given a classified settlement fault and the
//! attempt count, decide between an internal resubmission (with an escalated
//! network fee) and a terminal failure. Escalation doubles the submission
//! fee per attempt; the fee charged to the session never changes.

use crate::settlement::FaultKind;

/// What the poller should do after a failed operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit as `attempt` with `fee` attached as the network fee override
    Retry { attempt: u32, fee: u64 },
    /// Give up: release the reservation and mark the row failed
    Fail,
}

/// Network fee for a given attempt: the base fee doubled per retry.
/// Attempt 0 pays the base fee.
pub fn fee_for_attempt(base_fee: u64, attempt: u32) -> u64 {
    base_fee.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
}

/// Decide retry vs. terminal failure
pub fn decide(fault: FaultKind, attempt: u32, max_attempts: u32, base_fee: u64) -> RetryDecision {
    if fault.is_retryable() && attempt < max_attempts {
        let next = attempt + 1;
        RetryDecision::Retry {
            attempt: next,
            fee: fee_for_attempt(base_fee, next),
        }
    } else {
        RetryDecision::Fail
    }
}

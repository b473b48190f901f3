//! Monitoring & Metrics
//!
//! Counter registry with Prometheus text export for the withdrawal
//! lifecycle. Counters are monotonic and lock-free; the /metrics endpoint
//! renders them on demand.

use crate::api::handlers::AppState;
use axum::extract::State;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Prometheus-compatible metrics registry
#[derive(Default)]
pub struct MetricsRegistry {
    /// HTTP request metrics
    pub http_requests_total: AtomicU64,

    /// Withdrawal lifecycle metrics
    pub withdrawals_requested_total: AtomicU64,
    pub withdrawals_confirmed_total: AtomicU64,
    pub withdrawals_failed_total: AtomicU64,
    pub withdrawals_rejected_total: AtomicU64,
    pub reservations_released_total: AtomicU64,
    pub settlement_retries_total: AtomicU64,

    /// Error metrics
    pub errors_total: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.http_requests_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::SeqCst);
    }

    /// Generate Prometheus metrics format
    pub fn to_prometheus_format(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 8] = [
            (
                "cashier_http_requests_total",
                "Total number of HTTP requests",
                &self.http_requests_total,
            ),
            (
                "cashier_withdrawals_requested_total",
                "Withdrawal requests accepted and reserved",
                &self.withdrawals_requested_total,
            ),
            (
                "cashier_withdrawals_confirmed_total",
                "Withdrawals confirmed on the settlement network",
                &self.withdrawals_confirmed_total,
            ),
            (
                "cashier_withdrawals_failed_total",
                "Withdrawals that reached a terminal failure",
                &self.withdrawals_failed_total,
            ),
            (
                "cashier_withdrawals_rejected_total",
                "Withdrawals rejected by an operator",
                &self.withdrawals_rejected_total,
            ),
            (
                "cashier_reservations_released_total",
                "Ledger reservations released back to sessions",
                &self.reservations_released_total,
            ),
            (
                "cashier_settlement_retries_total",
                "Internal resubmissions with escalated fees",
                &self.settlement_retries_total,
            ),
            (
                "cashier_errors_total",
                "Requests that returned an error response",
                &self.errors_total,
            ),
        ];

        let mut output = String::new();
        for (name, help, counter) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                counter.load(Ordering::SeqCst)
            ));
        }
        output
    }
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics.to_prometheus_format()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_format_contains_all_counters() {
        let registry = MetricsRegistry::new();
        registry.record_request();
        registry.record_request();
        registry
            .withdrawals_requested_total
            .fetch_add(1, Ordering::SeqCst);

        let output = registry.to_prometheus_format();
        assert!(output.contains("cashier_http_requests_total 2"));
        assert!(output.contains("cashier_withdrawals_requested_total 1"));
        assert!(output.contains("# TYPE cashier_errors_total counter"));
    }
}

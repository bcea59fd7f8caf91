//! Metrics collection for bank monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Bank metrics.
pub struct Metrics {
    /// Deposits accepted.
    pub deposits_accepted: AtomicU64,
    /// Deposits rejected.
    pub deposits_rejected: AtomicU64,
    /// Withdrawals paid out.
    pub withdrawals_accepted: AtomicU64,
    /// Withdrawals rejected.
    pub withdrawals_rejected: AtomicU64,
    /// Mutating calls refused because another operation was running.
    pub reentrant_calls_blocked: AtomicU64,
    /// Transfers into or out of custody that failed.
    pub transfer_failures: AtomicU64,
    /// Effects undone after a late failure.
    pub compensations: AtomicU64,
    /// Assets currently registered, native included.
    pub assets_supported: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            deposits_accepted: AtomicU64::new(0),
            deposits_rejected: AtomicU64::new(0),
            withdrawals_accepted: AtomicU64::new(0),
            withdrawals_rejected: AtomicU64::new(0),
            reentrant_calls_blocked: AtomicU64::new(0),
            transfer_failures: AtomicU64::new(0),
            compensations: AtomicU64::new(0),
            assets_supported: AtomicU64::new(1),
        }
    }

    /// Record an accepted deposit.
    pub fn deposit_accepted(&self) {
        self.deposits_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected deposit.
    pub fn deposit_rejected(&self) {
        self.deposits_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted withdrawal.
    pub fn withdrawal_accepted(&self) {
        self.withdrawals_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected withdrawal.
    pub fn withdrawal_rejected(&self) {
        self.withdrawals_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a blocked reentrant call.
    pub fn reentrant_call_blocked(&self) {
        self.reentrant_calls_blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed transfer.
    pub fn transfer_failed(&self) {
        self.transfer_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a compensating effect.
    pub fn compensated(&self) {
        self.compensations.fetch_add(1, Ordering::Relaxed);
    }

    /// Set supported asset count.
    pub fn set_assets_supported(&self, count: u64) {
        self.assets_supported.store(count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deposits_accepted: self.deposits_accepted.load(Ordering::Relaxed),
            deposits_rejected: self.deposits_rejected.load(Ordering::Relaxed),
            withdrawals_accepted: self.withdrawals_accepted.load(Ordering::Relaxed),
            withdrawals_rejected: self.withdrawals_rejected.load(Ordering::Relaxed),
            reentrant_calls_blocked: self.reentrant_calls_blocked.load(Ordering::Relaxed),
            transfer_failures: self.transfer_failures.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            assets_supported: self.assets_supported.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP custodia_deposits_accepted Total accepted deposits
# TYPE custodia_deposits_accepted counter
custodia_deposits_accepted {}

# HELP custodia_deposits_rejected Total rejected deposits
# TYPE custodia_deposits_rejected counter
custodia_deposits_rejected {}

# HELP custodia_withdrawals_accepted Total accepted withdrawals
# TYPE custodia_withdrawals_accepted counter
custodia_withdrawals_accepted {}

# HELP custodia_withdrawals_rejected Total rejected withdrawals
# TYPE custodia_withdrawals_rejected counter
custodia_withdrawals_rejected {}

# HELP custodia_reentrant_calls_blocked Total reentrant calls refused
# TYPE custodia_reentrant_calls_blocked counter
custodia_reentrant_calls_blocked {}

# HELP custodia_transfer_failures Total failed custody transfers
# TYPE custodia_transfer_failures counter
custodia_transfer_failures {}

# HELP custodia_compensations Total compensated operations
# TYPE custodia_compensations counter
custodia_compensations {}

# HELP custodia_assets_supported Current supported assets
# TYPE custodia_assets_supported gauge
custodia_assets_supported {}
"#,
            snapshot.deposits_accepted,
            snapshot.deposits_rejected,
            snapshot.withdrawals_accepted,
            snapshot.withdrawals_rejected,
            snapshot.reentrant_calls_blocked,
            snapshot.transfer_failures,
            snapshot.compensations,
            snapshot.assets_supported,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub deposits_accepted: u64,
    pub deposits_rejected: u64,
    pub withdrawals_accepted: u64,
    pub withdrawals_rejected: u64,
    pub reentrant_calls_blocked: u64,
    pub transfer_failures: u64,
    pub compensations: u64,
    pub assets_supported: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

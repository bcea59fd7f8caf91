//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

/// Simulation metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Total bank operations attempted.
    pub total_operations: u64,
    /// Successful operations.
    pub successful_operations: u64,
    /// Failed operations.
    pub failed_operations: u64,
    /// Price moves applied.
    pub price_moves: u64,
    /// Failures keyed by error code.
    pub failures_by_code: BTreeMap<String, u64>,
    /// Latency samples (us).
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            price_moves: 0,
            failures_by_code: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a successful operation.
    pub fn record_success(&mut self, latency_us: u64) {
        self.total_operations += 1;
        self.successful_operations += 1;
        self.sample(latency_us);
    }

    /// Record a failed operation.
    pub fn record_failure(&mut self, code: &str, latency_us: u64) {
        self.total_operations += 1;
        self.failed_operations += 1;
        *self.failures_by_code.entry(code.to_string()).or_insert(0) += 1;
        self.sample(latency_us);
    }

    /// Record a price move.
    pub fn record_price_move(&mut self) {
        self.price_moves += 1;
    }

    /// Get average latency in us.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.successful_operations as f64 / self.total_operations as f64
    }

    fn sample(&mut self, latency_us: u64) {
        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_success(100);
        metrics.record_success(200);
        metrics.record_success(150);
        metrics.record_failure("BANK_CAP_EXCEEDED", 150);
        metrics.record_price_move();

        assert_eq!(metrics.total_operations, 4);
        assert_eq!(metrics.successful_operations, 3);
        assert_eq!(metrics.failed_operations, 1);
        assert_eq!(metrics.failures_by_code["BANK_CAP_EXCEEDED"], 1);
        assert_eq!(metrics.average_latency_us(), 150);
        assert_eq!(metrics.p99_latency_us(), 200);
        assert_eq!(metrics.success_rate(), 0.75);
    }
}

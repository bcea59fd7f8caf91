//! Custodia Bank
//!
//! The bank orchestrates deposits and withdrawals across the native asset
//! and admin-registered fungible assets. Every operation runs its checks
//! first, then the ledger effect, then the outgoing transfer, and holds a
//! single operation gate for its whole duration.

pub mod bank;
pub mod config;
pub mod enforcer;
pub mod metrics;
pub mod state;
pub mod transfer;

pub use bank::Bank;
pub use config::BankConfig;
pub use enforcer::InvariantEnforcer;
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use state::{OperationKind, OperationState};
pub use transfer::{AssetTransfer, TransferError, TransferResult};

#[cfg(any(test, feature = "test-utils"))]
pub use transfer::{InMemoryTransfers, PushHook};

//! Operation state tag and reentrancy guard.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use custodia_common::{BankError, Result};

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Gates held by the operations running on the current task.
    static HELD_GATES: Vec<u64>;
}

/// The kind of mutating operation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A deposit.
    Deposit,
    /// A withdrawal.
    Withdrawal,
    /// A registry change.
    Registry,
}

/// Bank operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// No operation running.
    Idle,
    /// An operation owns the ledger until it completes or fails.
    InOperation(OperationKind),
}

impl OperationState {
    /// Check if no operation is running.
    pub fn is_idle(&self) -> bool {
        matches!(self, OperationState::Idle)
    }
}

/// Serializes mutating operations.
///
/// Independent callers queue and run one at a time. A call made from
/// inside a running operation, such as from the outgoing transfer of a
/// withdrawal, is on the same task and is refused with
/// [`BankError::OperationInProgress`] instead of waiting on itself.
/// Read-only views do not pass through the gate and observe the
/// committed effects.
#[derive(Debug)]
pub struct OperationGate {
    id: u64,
    queue: tokio::sync::Mutex<()>,
    state: Mutex<OperationState>,
}

impl OperationGate {
    /// Create an idle gate.
    pub fn new() -> Self {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            queue: tokio::sync::Mutex::new(()),
            state: Mutex::new(OperationState::Idle),
        }
    }

    /// Run `operation` while holding the gate.
    ///
    /// Waits for any operation started by another task. Fails without
    /// running `operation` when the current task already holds the gate.
    pub async fn run<F, T>(&self, kind: OperationKind, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut held = HELD_GATES.try_with(|gates| gates.clone()).unwrap_or_default();
        if held.contains(&self.id) {
            debug!(requested = ?kind, current = ?self.state(), "Nested operation refused");
            return Err(BankError::OperationInProgress);
        }

        let _slot = self.queue.lock().await;
        let _guard = OperationGuard::new(self, kind);
        held.push(self.id);
        HELD_GATES.scope(held, operation).await
    }

    /// Get the current state.
    pub fn state(&self) -> OperationState {
        *self.state.lock()
    }
}

impl Default for OperationGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the gate busy for one operation; returns it to `Idle` on drop,
/// including when the operation fails or its future is dropped.
struct OperationGuard<'a> {
    gate: &'a OperationGate,
    kind: OperationKind,
}

impl<'a> OperationGuard<'a> {
    fn new(gate: &'a OperationGate, kind: OperationKind) -> Self {
        *gate.state.lock() = OperationState::InOperation(kind);
        debug!(kind = ?kind, "Operation started");
        Self { gate, kind }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        *self.gate.state.lock() = OperationState::Idle;
        debug!(kind = ?self.kind, "Operation finished");
    }
}

//! Custodia Ledger
//!
//! Per-user, per-asset balances and per-asset totals at ledger precision,
//! with a journal of every mutation and an integrity check for the
//! conservation invariant.

pub mod engine;
pub mod journal;

pub use engine::{IntegrityViolation, Ledger};
pub use journal::{EntryType, JournalEntry};

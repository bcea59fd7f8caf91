//! Journal entries recording every ledger mutation.

use chrono::{DateTime, Utc};
use custodia_common::{AssetId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Balance and total increased.
    Credit,
    /// Balance and total decreased.
    Debit,
    /// Balance and total restored after a debit was rolled back.
    Reversal,
}

/// A single journal entry in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// User whose balance changed.
    pub user: UserId,
    /// Asset affected.
    pub asset: AssetId,
    /// Entry type.
    pub entry_type: EntryType,
    /// The debit this entry rolls back, for reversals.
    pub reverses: Option<Uuid>,
    /// Amount at ledger precision.
    pub amount: u128,
    /// User balance after this entry.
    pub balance_after: u128,
    /// Asset total after this entry.
    pub total_after: u128,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub(crate) fn new(
        user: UserId,
        asset: AssetId,
        entry_type: EntryType,
        amount: u128,
        balance_after: u128,
        total_after: u128,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user,
            asset,
            entry_type,
            reverses: None,
            amount,
            balance_after,
            total_after,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn reversing(mut self, debit: Uuid) -> Self {
        self.reverses = Some(debit);
        self
    }

    /// Check if this entry rolls back an earlier debit.
    pub fn is_reversal(&self) -> bool {
        self.entry_type == EntryType::Reversal
    }

    /// Get signed amount (positive for credit and reversal, negative for debit).
    pub fn signed_amount(&self) -> i128 {
        // ledger amounts stay far below i128::MAX
        let amount = self.amount as i128;
        match self.entry_type {
            EntryType::Credit | EntryType::Reversal => amount,
            EntryType::Debit => -amount,
        }
    }
}

//! Core ledger implementation.

use std::collections::{BTreeMap, HashMap};

use custodia_common::{AssetId, BankError, Result, UserId};
use thiserror::Error;
use tracing::debug;

use crate::journal::{EntryType, JournalEntry};

/// A broken ledger invariant, reported by [`Ledger::verify_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    /// Sum of user balances differs from the stored total.
    #[error("Balances of {asset} sum to {balances}, total is {total}")]
    TotalMismatch {
        asset: AssetId,
        balances: u128,
        total: u128,
    },

    /// Replaying the journal does not reproduce the stored total.
    #[error("Journal of {asset} replays to {replayed}, total is {total}")]
    JournalMismatch {
        asset: AssetId,
        replayed: i128,
        total: u128,
    },
}

/// Per-user, per-asset balances and per-asset totals, all at ledger
/// precision.
///
/// Entries are created at zero on first reference and never removed.
/// `credit` cannot fail and `debit` only fails on insufficient balance, so
/// both are safe as the unconditional effects phase of an operation whose
/// checks already passed.
#[derive(Debug, Default)]
pub struct Ledger {
    balances: HashMap<(UserId, AssetId), u128>,
    totals: BTreeMap<AssetId, u128>,
    journal: Vec<JournalEntry>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increase a user's balance and the asset total.
    pub fn credit(&mut self, user: &UserId, asset: &AssetId, amount: u128) -> JournalEntry {
        let entry = self.increase(user, asset, amount, EntryType::Credit);
        debug!(user = %user, asset = %asset, amount, balance_after = entry.balance_after, "Ledger credit");
        self.record(entry)
    }

    /// Undo a debit whose operation was rolled back.
    ///
    /// The journal keeps the debit and gains a [`EntryType::Reversal`]
    /// entry pointing at it, so the pair nets to zero on replay.
    pub fn reverse(&mut self, debit: &JournalEntry) -> Result<JournalEntry> {
        if debit.entry_type != EntryType::Debit {
            return Err(BankError::ConfigurationError(format!(
                "journal entry {} is not a debit",
                debit.id
            )));
        }
        if self.journal.iter().any(|entry| entry.reverses == Some(debit.id)) {
            return Err(BankError::ConfigurationError(format!(
                "debit {} is already reversed",
                debit.id
            )));
        }

        let entry = self
            .increase(&debit.user, &debit.asset, debit.amount, EntryType::Reversal)
            .reversing(debit.id);
        debug!(
            user = %debit.user,
            asset = %debit.asset,
            amount = debit.amount,
            debit = %debit.id,
            "Ledger debit reversed"
        );
        Ok(self.record(entry))
    }

    fn increase(
        &mut self,
        user: &UserId,
        asset: &AssetId,
        amount: u128,
        entry_type: EntryType,
    ) -> JournalEntry {
        let balance = self
            .balances
            .entry((user.clone(), asset.clone()))
            .or_insert(0);
        *balance += amount;
        let balance_after = *balance;

        let total = self.totals.entry(asset.clone()).or_insert(0);
        *total += amount;
        let total_after = *total;

        JournalEntry::new(
            user.clone(),
            asset.clone(),
            entry_type,
            amount,
            balance_after,
            total_after,
        )
    }

    /// Decrease a user's balance and the asset total.
    pub fn debit(&mut self, user: &UserId, asset: &AssetId, amount: u128) -> Result<JournalEntry> {
        let available = self.balance_of(user, asset);
        if amount > available {
            return Err(BankError::InsufficientBalance {
                user: user.clone(),
                asset: asset.clone(),
                requested: amount,
                available,
            });
        }

        let balance_after = available - amount;
        self.balances
            .insert((user.clone(), asset.clone()), balance_after);

        // total >= balance >= amount by conservation
        let total = self.totals.entry(asset.clone()).or_insert(0);
        *total -= amount;
        let total_after = *total;

        debug!(user = %user, asset = %asset, amount, balance_after, "Ledger debit");

        Ok(self.record(JournalEntry::new(
            user.clone(),
            asset.clone(),
            EntryType::Debit,
            amount,
            balance_after,
            total_after,
        )))
    }

    /// Check whether a debit of `amount` would succeed.
    pub fn can_debit(&self, user: &UserId, asset: &AssetId, amount: u128) -> Result<()> {
        let available = self.balance_of(user, asset);
        if amount > available {
            return Err(BankError::InsufficientBalance {
                user: user.clone(),
                asset: asset.clone(),
                requested: amount,
                available,
            });
        }
        Ok(())
    }

    /// Get a user's balance.
    pub fn balance_of(&self, user: &UserId, asset: &AssetId) -> u128 {
        self.balances
            .get(&(user.clone(), asset.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Get an asset's total.
    pub fn total_of(&self, asset: &AssetId) -> u128 {
        self.totals.get(asset).copied().unwrap_or(0)
    }

    /// All assets with a nonzero total.
    pub fn nonzero_totals(&self) -> Vec<(AssetId, u128)> {
        self.totals
            .iter()
            .filter(|(_, total)| **total > 0)
            .map(|(asset, total)| (asset.clone(), *total))
            .collect()
    }

    /// All of a user's nonzero balances.
    pub fn balances_of(&self, user: &UserId) -> Vec<(AssetId, u128)> {
        let mut balances: Vec<(AssetId, u128)> = self
            .balances
            .iter()
            .filter(|((holder, _), amount)| holder == user && **amount > 0)
            .map(|((_, asset), amount)| (asset.clone(), *amount))
            .collect();
        balances.sort();
        balances
    }

    /// Journal entries, oldest first.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.journal
    }

    /// Verify that every asset total equals both the sum of its user
    /// balances and the replay of its journal.
    pub fn verify_integrity(&self) -> std::result::Result<(), IntegrityViolation> {
        let mut balance_sums: BTreeMap<&AssetId, u128> = BTreeMap::new();
        for ((_, asset), amount) in &self.balances {
            *balance_sums.entry(asset).or_insert(0) += *amount;
        }

        let mut replayed: BTreeMap<&AssetId, i128> = BTreeMap::new();
        for entry in &self.journal {
            *replayed.entry(&entry.asset).or_insert(0) += entry.signed_amount();
        }

        for (asset, total) in &self.totals {
            let balances = balance_sums.get(asset).copied().unwrap_or(0);
            if balances != *total {
                return Err(IntegrityViolation::TotalMismatch {
                    asset: asset.clone(),
                    balances,
                    total: *total,
                });
            }

            let replayed = replayed.get(asset).copied().unwrap_or(0);
            if replayed != *total as i128 {
                return Err(IntegrityViolation::JournalMismatch {
                    asset: asset.clone(),
                    replayed,
                    total: *total,
                });
            }
        }

        Ok(())
    }

    fn record(&mut self, entry: JournalEntry) -> JournalEntry {
        self.journal.push(entry.clone());
        entry
    }
}

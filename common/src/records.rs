//! Observable records emitted by the bank.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AssetId, FeedId, RecordId, UserId};

/// Direction of a custody movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    /// Value entering custody.
    Deposit,
    /// Value leaving custody.
    Withdrawal,
}

/// A successful deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    /// Unique record ID.
    pub id: RecordId,
    /// Deposit or withdrawal.
    pub kind: MovementKind,
    /// Depositor / withdrawer.
    pub user: UserId,
    /// Asset moved.
    pub asset: AssetId,
    /// Amount moved, in the asset's native precision.
    pub amount: u128,
    /// Amount booked on the ledger, at ledger precision.
    pub normalized: u128,
    /// Reference-currency value of `amount` at the time of the operation.
    pub value: u128,
    /// When the operation completed.
    pub timestamp: DateTime<Utc>,
}

impl MovementRecord {
    /// Create a deposit record.
    pub fn deposit(
        user: UserId,
        asset: AssetId,
        amount: u128,
        normalized: u128,
        value: u128,
    ) -> Self {
        Self::new(MovementKind::Deposit, user, asset, amount, normalized, value)
    }

    /// Create a withdrawal record.
    pub fn withdrawal(
        user: UserId,
        asset: AssetId,
        amount: u128,
        normalized: u128,
        value: u128,
    ) -> Self {
        Self::new(MovementKind::Withdrawal, user, asset, amount, normalized, value)
    }

    fn new(
        kind: MovementKind,
        user: UserId,
        asset: AssetId,
        amount: u128,
        normalized: u128,
        value: u128,
    ) -> Self {
        Self {
            id: RecordId::new(),
            kind,
            user,
            asset,
            amount,
            normalized,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Registry change: an asset gained or lost its price-source binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Asset affected.
    pub asset: AssetId,
    /// Price feed bound to the asset.
    pub feed: FeedId,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

impl AssetRecord {
    /// Create a new registry record.
    pub fn new(asset: AssetId, feed: FeedId) -> Self {
        Self {
            asset,
            feed,
            timestamp: Utc::now(),
        }
    }
}

/// Every observable record the bank emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankEvent {
    /// A deposit was accepted.
    Deposit(MovementRecord),
    /// A withdrawal was paid out.
    Withdrawal(MovementRecord),
    /// An asset was registered.
    AssetRegistered(AssetRecord),
    /// An asset was deregistered.
    AssetDeregistered(AssetRecord),
}

impl BankEvent {
    /// The asset this event concerns.
    pub fn asset(&self) -> &AssetId {
        match self {
            BankEvent::Deposit(r) | BankEvent::Withdrawal(r) => &r.asset,
            BankEvent::AssetRegistered(r) | BankEvent::AssetDeregistered(r) => &r.asset,
        }
    }
}

impl From<MovementRecord> for BankEvent {
    fn from(record: MovementRecord) -> Self {
        match record.kind {
            MovementKind::Deposit => BankEvent::Deposit(record),
            MovementKind::Withdrawal => BankEvent::Withdrawal(record),
        }
    }
}

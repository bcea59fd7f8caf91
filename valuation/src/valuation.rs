//! Valuation records.

use chrono::{DateTime, Utc};
use custodia_common::{format_units, AssetId, REFERENCE_DECIMALS};
use serde::{Deserialize, Serialize};

/// The reference-currency value of a native amount at a given price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    /// Asset priced.
    pub asset: AssetId,
    /// Amount priced, in native precision.
    pub amount: u128,
    /// Price used (always positive).
    pub price: u128,
    /// Fractional digits of `price`.
    pub price_decimals: u8,
    /// Value in reference units (`REFERENCE_DECIMALS` fractional digits).
    pub value: u128,
    /// When the price was read.
    pub priced_at: DateTime<Utc>,
}

impl Valuation {
    /// Create a new valuation record.
    pub fn new(asset: AssetId, amount: u128, price: u128, price_decimals: u8, value: u128) -> Self {
        Self {
            asset,
            amount,
            price,
            price_decimals,
            value,
            priced_at: Utc::now(),
        }
    }

    /// Human-readable value for logs.
    pub fn display_value(&self) -> String {
        format_units(self.value, REFERENCE_DECIMALS)
    }
}

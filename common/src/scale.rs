//! Decimal normalization between native and ledger precision.
//!
//! Scaling down to ledger precision truncates. For an asset with more than
//! [`LEDGER_DECIMALS`] fractional digits, the low-order digits of a
//! deposit are dropped and cannot be recovered by [`from_ledger`]:
//!
//! ```text
//! to_ledger(18, 1_234_567_890_123_456_789) == 1_234_567
//! from_ledger(18, 1_234_567)               == 1_234_567_000_000_000_000
//! ```
//!
//! The loss is part of the observable balance semantics and must not be
//! rounded away.

use crate::amount::{pow10, LEDGER_DECIMALS};
use crate::error::{BankError, Result};

/// Scale a native amount down (or up) to ledger precision.
///
/// Floors when `decimals > LEDGER_DECIMALS`; exact otherwise.
pub fn to_ledger(decimals: u8, amount: u128) -> Result<u128> {
    if decimals > LEDGER_DECIMALS {
        let factor = pow10(decimals - LEDGER_DECIMALS).ok_or(BankError::AmountOverflow)?;
        Ok(amount / factor)
    } else {
        let factor = pow10(LEDGER_DECIMALS - decimals).ok_or(BankError::AmountOverflow)?;
        amount.checked_mul(factor).ok_or(BankError::AmountOverflow)
    }
}

/// Scale a ledger amount back to native precision.
///
/// Exact when `decimals >= LEDGER_DECIMALS`; floors otherwise, which only
/// matters for values that were never produced by [`to_ledger`].
pub fn from_ledger(decimals: u8, normalized: u128) -> Result<u128> {
    if decimals > LEDGER_DECIMALS {
        let factor = pow10(decimals - LEDGER_DECIMALS).ok_or(BankError::AmountOverflow)?;
        normalized.checked_mul(factor).ok_or(BankError::AmountOverflow)
    } else {
        let factor = pow10(LEDGER_DECIMALS - decimals).ok_or(BankError::AmountOverflow)?;
        Ok(normalized / factor)
    }
}

/// The part of `amount` that survives normalization, in native units.
pub fn settleable(decimals: u8, amount: u128) -> Result<u128> {
    from_ledger(decimals, to_ledger(decimals, amount)?)
}

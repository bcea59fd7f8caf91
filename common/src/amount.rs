//! Fixed precisions and integer amount helpers.
//!
//! Every amount in Custodia is an unsigned integer in some fixed-point unit:
//!
//! - native amounts use the asset's own precision,
//! - stored balances use [`LEDGER_DECIMALS`],
//! - valuations and the configured limits use [`REFERENCE_DECIMALS`].
//!
//! `rust_decimal` is only used at the edges, to parse human-entered
//! amounts and to render raw amounts for logs.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{BankError, Result};

pub use wide::U256;

// Kept apart so the macro's own `Result<T, E>` does not pick up the
// crate alias imported above.
mod wide {
    use uint::construct_uint;

    construct_uint! {
        /// 256-bit unsigned integer for intermediate products.
        pub struct U256(4);
    }
}

/// Fractional digits of every stored balance and asset total.
pub const LEDGER_DECIMALS: u8 = 6;

/// Fractional digits of reference-currency values and limits.
pub const REFERENCE_DECIMALS: u8 = 18;

/// Fractional digits of the native asset.
pub const NATIVE_DECIMALS: u8 = 18;

/// Largest native precision accepted at registration.
pub const MAX_ASSET_DECIMALS: u8 = 36;

/// `10^exp` as a `u128`, or `None` past `10^38`.
pub fn pow10(exp: u8) -> Option<u128> {
    10u128.checked_pow(u32::from(exp))
}

/// `10^exp` as a [`U256`].
pub fn pow10_wide(exp: u8) -> U256 {
    U256::exp10(usize::from(exp))
}

/// Narrow a [`U256`] back to `u128`.
pub fn narrow(value: U256) -> Option<u128> {
    if value > U256::from(u128::MAX) {
        None
    } else {
        Some(value.low_u128())
    }
}

/// Parse a human decimal string (`"50000"`, `"1250.5"`) into raw units
/// with `decimals` fractional digits. The conversion is exact: input with
/// more fractional digits than `decimals` is rejected, not rounded.
pub fn parse_units(input: &str, decimals: u8) -> Result<u128> {
    let value = Decimal::from_str(input.trim()).map_err(|e| {
        BankError::ConfigurationError(format!("invalid amount '{}': {}", input, e))
    })?;

    if value.is_sign_negative() && !value.is_zero() {
        return Err(BankError::ConfigurationError(format!(
            "amount '{}' cannot be negative",
            input
        )));
    }

    let value = value.normalize();
    let scale = value.scale();
    if scale > u32::from(decimals) {
        return Err(BankError::ConfigurationError(format!(
            "amount '{}' has more than {} fractional digits",
            input, decimals
        )));
    }

    let mantissa = value.mantissa().unsigned_abs();
    // scale <= decimals <= u8::MAX here
    let factor = pow10(decimals - scale as u8).ok_or(BankError::AmountOverflow)?;
    mantissa.checked_mul(factor).ok_or(BankError::AmountOverflow)
}

/// Render raw units as a [`Decimal`], when representable.
pub fn to_decimal(raw: u128, decimals: u8) -> Option<Decimal> {
    let raw = i128::try_from(raw).ok()?;
    Decimal::try_from_i128_with_scale(raw, u32::from(decimals))
        .ok()
        .map(|d| d.normalize())
}

/// Render raw units for logs, falling back to scientific notation for
/// values outside the `Decimal` range.
pub fn format_units(raw: u128, decimals: u8) -> String {
    match to_decimal(raw, decimals) {
        Some(value) => value.to_string(),
        None => format!("{}e-{}", raw, decimals),
    }
}

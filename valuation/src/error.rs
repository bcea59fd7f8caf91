//! Valuation error types.

use custodia_common::{AssetId, BankError};
use thiserror::Error;

/// Errors that can occur while pricing an amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValuationError {
    /// The price source reported no data.
    #[error("Price not available for {0}")]
    PriceUnavailable(AssetId),

    /// The price source reported a zero or negative price.
    #[error("Non-positive price {price} reported for {asset}")]
    NonPositivePrice { asset: AssetId, price: i128 },

    /// The price source failed.
    #[error("Price source error for {asset}: {reason}")]
    ProviderError { asset: AssetId, reason: String },

    /// The value does not fit the reference-currency range.
    #[error("Valuation overflow for {0}")]
    Overflow(AssetId),
}

impl From<ValuationError> for BankError {
    fn from(err: ValuationError) -> Self {
        match err {
            ValuationError::Overflow(_) => BankError::AmountOverflow,
            ValuationError::PriceUnavailable(ref asset)
            | ValuationError::NonPositivePrice { ref asset, .. }
            | ValuationError::ProviderError { ref asset, .. } => BankError::InvalidPriceData {
                asset: asset.clone(),
                reason: err.to_string(),
            },
        }
    }
}

/// Result type for valuation operations.
pub type ValuationResult<T> = Result<T, ValuationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_non_positive_prices_map_to_invalid_price_data() {
        let missing: BankError = ValuationError::PriceUnavailable(AssetId::Native).into();
        let zero: BankError = ValuationError::NonPositivePrice {
            asset: AssetId::Native,
            price: 0,
        }
        .into();

        assert_eq!(missing.error_code(), "INVALID_PRICE_DATA");
        assert_eq!(zero.error_code(), "INVALID_PRICE_DATA");
    }

    #[test]
    fn test_overflow_maps_to_amount_overflow() {
        let err: BankError = ValuationError::Overflow(AssetId::token("dai")).into();
        assert_eq!(err, BankError::AmountOverflow);
    }
}

//! Reference-currency valuation engine.

use std::sync::atomic::{AtomicU64, Ordering};

use custodia_common::{narrow, pow10_wide, REFERENCE_DECIMALS, U256};
use tracing::{debug, instrument, warn};

use crate::error::{ValuationError, ValuationResult};
use crate::provider::PriceQuote;
use crate::registry::AssetBinding;
use crate::valuation::Valuation;

/// `10^77` is the largest power of ten below `2^256`.
const MAX_WIDE_EXPONENT: u32 = 77;

/// Compute `amount * price * 10^REFERENCE_DECIMALS / (10^asset_decimals * 10^price_decimals)`.
///
/// The product is formed in 256 bits and divided once, so the result is the
/// exact quotient truncated toward zero. Returns `None` when either the
/// intermediate or the result does not fit.
pub fn reference_value(
    amount: u128,
    asset_decimals: u8,
    price: u128,
    price_decimals: u8,
) -> Option<u128> {
    let product = U256::from(amount).checked_mul(U256::from(price))?;

    let up = u32::from(REFERENCE_DECIMALS);
    let down = u32::from(asset_decimals) + u32::from(price_decimals);

    let scaled = if up >= down {
        // up - down <= REFERENCE_DECIMALS
        product.checked_mul(pow10_wide((up - down) as u8))?
    } else if down - up > MAX_WIDE_EXPONENT {
        U256::zero()
    } else {
        product / pow10_wide((down - up) as u8)
    };

    narrow(scaled)
}

/// Prices native amounts through the asset's bound feed.
///
/// Every call reads the feed again; nothing is cached between calls, so a
/// price change is visible to the very next valuation.
pub struct ValuationEngine {
    quotes_fetched: AtomicU64,
    quotes_rejected: AtomicU64,
}

impl ValuationEngine {
    /// Create a new valuation engine.
    pub fn new() -> Self {
        Self {
            quotes_fetched: AtomicU64::new(0),
            quotes_rejected: AtomicU64::new(0),
        }
    }

    /// Read and validate the current price for a bound asset.
    pub async fn fetch_quote(&self, binding: &AssetBinding) -> ValuationResult<PriceQuote> {
        self.quotes_fetched.fetch_add(1, Ordering::Relaxed);

        let quote = match binding.source.latest_price(&binding.asset).await {
            Ok(quote) => quote,
            Err(e) => {
                self.quotes_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    asset = %binding.asset,
                    source = binding.source.name(),
                    error = %e,
                    "Price source returned no data"
                );
                return Err(e);
            }
        };

        if quote.price <= 0 {
            self.quotes_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                asset = %binding.asset,
                source = binding.source.name(),
                price = %quote.price,
                "Price source returned a non-positive price"
            );
            return Err(ValuationError::NonPositivePrice {
                asset: binding.asset.clone(),
                price: quote.price,
            });
        }

        debug!(
            asset = %binding.asset,
            price = %quote.price,
            price_decimals = quote.decimals,
            "Got price from source"
        );

        Ok(quote)
    }

    /// Value a native amount of the bound asset in reference units.
    #[instrument(skip(self, binding), fields(asset = %binding.asset))]
    pub async fn value_of(&self, binding: &AssetBinding, amount: u128) -> ValuationResult<Valuation> {
        let quote = self.fetch_quote(binding).await?;
        // fetch_quote only returns positive prices
        let price = quote.price.unsigned_abs();

        let value = reference_value(amount, binding.decimals, price, quote.decimals)
            .ok_or_else(|| ValuationError::Overflow(binding.asset.clone()))?;

        Ok(Valuation::new(
            binding.asset.clone(),
            amount,
            price,
            quote.decimals,
            value,
        ))
    }

    /// Get engine statistics.
    pub fn stats(&self) -> ValuationStats {
        ValuationStats {
            quotes_fetched: self.quotes_fetched.load(Ordering::Relaxed),
            quotes_rejected: self.quotes_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for ValuationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuationStats {
    /// Feed reads attempted.
    pub quotes_fetched: u64,
    /// Feed reads that returned invalid data.
    pub quotes_rejected: u64,
}

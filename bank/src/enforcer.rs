//! Capacity and withdrawal-ceiling checks.

use custodia_common::{format_units, scale, BankError, Result, REFERENCE_DECIMALS};
use custodia_valuation::{AssetBinding, Valuation, ValuationEngine, ValuationStats};
use tracing::{debug, warn};

/// A registered asset together with its stored total at ledger precision.
pub type Holding = (AssetBinding, u128);

/// Validates operations against the two reference-currency limits.
///
/// Both checks are read-only. The global valuation is recomputed from the
/// stored totals on every call, re-reading each bound feed, so it always
/// reflects current prices.
pub struct InvariantEnforcer {
    engine: ValuationEngine,
    bank_cap: u128,
    withdrawal_threshold: u128,
}

impl InvariantEnforcer {
    /// Create an enforcer for the given limits.
    pub fn new(bank_cap: u128, withdrawal_threshold: u128) -> Self {
        Self {
            engine: ValuationEngine::new(),
            bank_cap,
            withdrawal_threshold,
        }
    }

    /// Global capacity.
    pub fn bank_cap(&self) -> u128 {
        self.bank_cap
    }

    /// Per-withdrawal ceiling.
    pub fn withdrawal_threshold(&self) -> u128 {
        self.withdrawal_threshold
    }

    /// Value a native amount of a bound asset.
    pub async fn value_of(&self, binding: &AssetBinding, amount: u128) -> Result<Valuation> {
        Ok(self.engine.value_of(binding, amount).await?)
    }

    /// Sum of the revalued totals of every holding.
    ///
    /// Zero totals are skipped without reading their feed. Any feed failure
    /// fails the whole computation.
    pub async fn current_valuation(&self, holdings: &[Holding]) -> Result<u128> {
        let mut sum: u128 = 0;
        for (binding, total) in holdings {
            if *total == 0 {
                continue;
            }
            let native = scale::from_ledger(binding.decimals, *total)?;
            let valuation = self.value_of(binding, native).await?;
            sum = sum
                .checked_add(valuation.value)
                .ok_or(BankError::AmountOverflow)?;
        }
        Ok(sum)
    }

    /// Fail unless `current + value(deposit) <= bank_cap`.
    pub async fn check_capacity(
        &self,
        holdings: &[Holding],
        binding: &AssetBinding,
        amount: u128,
    ) -> Result<Valuation> {
        let current = self.current_valuation(holdings).await?;
        let deposit = self.value_of(binding, amount).await?;

        match current.checked_add(deposit.value) {
            Some(after) if after <= self.bank_cap => {
                debug!(
                    asset = %binding.asset,
                    current = %format_units(current, REFERENCE_DECIMALS),
                    after = %format_units(after, REFERENCE_DECIMALS),
                    "Capacity check passed"
                );
                Ok(deposit)
            }
            _ => {
                let available = self.bank_cap.saturating_sub(current);
                warn!(
                    asset = %binding.asset,
                    requested = %format_units(deposit.value, REFERENCE_DECIMALS),
                    available = %format_units(available, REFERENCE_DECIMALS),
                    "Bank cap would be exceeded"
                );
                Err(BankError::BankCapExceeded {
                    requested: deposit.value,
                    available,
                })
            }
        }
    }

    /// Fail unless `value(withdrawal) <= withdrawal_threshold`.
    pub async fn check_withdrawal_ceiling(
        &self,
        binding: &AssetBinding,
        amount: u128,
    ) -> Result<Valuation> {
        let withdrawal = self.value_of(binding, amount).await?;

        if withdrawal.value > self.withdrawal_threshold {
            warn!(
                asset = %binding.asset,
                requested = %format_units(withdrawal.value, REFERENCE_DECIMALS),
                threshold = %format_units(self.withdrawal_threshold, REFERENCE_DECIMALS),
                "Withdrawal threshold exceeded"
            );
            return Err(BankError::WithdrawalThresholdExceeded {
                requested: withdrawal.value,
                threshold: self.withdrawal_threshold,
            });
        }

        Ok(withdrawal)
    }

    /// Feed read statistics.
    pub fn stats(&self) -> ValuationStats {
        self.engine.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_common::{AssetId, FeedId, NATIVE_DECIMALS};
    use custodia_valuation::MockPriceSource;
    use std::sync::Arc;

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn native_binding() -> (AssetBinding, Arc<MockPriceSource>) {
        let source = Arc::new(MockPriceSource::new("test"));
        // $1.00000000 per native unit keeps values equal to amounts
        source.set_price(AssetId::Native, 1_00000000, 8);
        let binding = AssetBinding::new(
            AssetId::Native,
            FeedId::new("ETH/USD"),
            source.clone(),
            NATIVE_DECIMALS,
        );
        (binding, source)
    }

    #[tokio::test]
    async fn test_capacity_reports_available() {
        let (binding, _) = native_binding();
        let enforcer = InvariantEnforcer::new(50_000 * ONE, 5_000 * ONE);
        // 49999 units at ledger precision
        let holdings = vec![(binding.clone(), 49_999_000_000)];

        let result = enforcer.check_capacity(&holdings, &binding, 2 * ONE).await;

        assert_eq!(
            result.unwrap_err(),
            BankError::BankCapExceeded {
                requested: 2 * ONE,
                available: ONE,
            }
        );

        let exact = enforcer.check_capacity(&holdings, &binding, ONE).await;
        assert_eq!(exact.unwrap().value, ONE);
    }

    #[tokio::test]
    async fn test_ceiling_is_inclusive() {
        let (binding, _) = native_binding();
        let enforcer = InvariantEnforcer::new(50_000 * ONE, 5_000 * ONE);

        assert!(enforcer
            .check_withdrawal_ceiling(&binding, 5_000 * ONE)
            .await
            .is_ok());

        let result = enforcer
            .check_withdrawal_ceiling(&binding, 5_000 * ONE + 1)
            .await;
        assert_eq!(
            result.unwrap_err(),
            BankError::WithdrawalThresholdExceeded {
                requested: 5_000 * ONE + 1,
                threshold: 5_000 * ONE,
            }
        );
    }

    #[tokio::test]
    async fn test_zero_totals_skip_feed() {
        let (binding, source) = native_binding();
        let enforcer = InvariantEnforcer::new(ONE, ONE);

        let value = enforcer
            .current_valuation(&[(binding, 0)])
            .await
            .unwrap();

        assert_eq!(value, 0);
        assert_eq!(source.query_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_price_blocks_recomputation() {
        let (binding, source) = native_binding();
        source.set_price(AssetId::Native, 0, 8);
        let enforcer = InvariantEnforcer::new(ONE, ONE);

        let result = enforcer.current_valuation(&[(binding, 1)]).await;

        assert!(matches!(result, Err(BankError::InvalidPriceData { .. })));
        assert_eq!(enforcer.stats().quotes_rejected, 1);
    }
}

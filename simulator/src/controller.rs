//! Simulation controller.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use custodia_bank::{BankConfig, MetricsSnapshot};
use custodia_common::{
    parse_units, pow10, AssetId, BankError, MovementRecord, UserId, REFERENCE_DECIMALS,
};

use crate::market::Market;
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Expect, Scenario, ScenarioStep};

/// Native price used by every market: $1.00000000.
const NATIVE_PRICE: i128 = 1_00000000;
const PRICE_DECIMALS: u8 = 8;

/// Controls the simulation.
pub struct SimulationController {
    /// Bank configuration for every market opened.
    config: BankConfig,
    /// Simulated depositors.
    users: Vec<UserId>,
    /// Random number generator.
    rng: StdRng,
    /// Simulation metrics.
    metrics: SimulationMetrics,
    /// Bank metrics of the last market run.
    bank_metrics: Option<MetricsSnapshot>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(config: BankConfig, user_count: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let users = (0..user_count.max(1))
            .map(|i| UserId::new(format!("user_{}", i + 1)))
            .collect();

        Self {
            config,
            users,
            rng,
            metrics: SimulationMetrics::new(),
            bank_metrics: None,
        }
    }

    /// Run a scenario against a fresh market.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        let market = Market::open(self.config.clone(), NATIVE_PRICE, PRICE_DECIMALS)?;

        for (index, step) in scenario.steps.iter().enumerate() {
            self.execute_step(&market, step)
                .await
                .with_context(|| format!("{} step {} failed: {:?}", scenario.name, index + 1, step))?;
            market.check_invariants()?;
        }

        self.bank_metrics = Some(market.bank.metrics().snapshot());
        info!("Scenario {} passed", scenario.name);
        Ok(())
    }

    /// Run `steps` random operations, checking every invariant after each.
    pub async fn run(&mut self, steps: usize) -> anyhow::Result<()> {
        info!("Running randomized simulation for {} steps", steps);

        let market = Market::open(self.config.clone(), NATIVE_PRICE, PRICE_DECIMALS)?;
        let mut prices: BTreeMap<AssetId, i128> = BTreeMap::new();
        prices.insert(AssetId::Native, NATIVE_PRICE);

        for (code, decimals, price) in [
            ("USDC", 6u8, 1_00000000i128),
            ("WBTC", 8, 30_000_00000000),
            ("DAI", 18, 1_00000000),
        ] {
            let asset = market.list(code, decimals, price, PRICE_DECIMALS).await?;
            for user in &self.users {
                // far more than the cap allows any user to deposit
                let whole = pow10(decimals).context("precision too wide")?;
                market.fund(user, &asset, 1_000_000 * whole);
            }
            prices.insert(asset, price);
        }

        let assets: Vec<AssetId> = prices.keys().cloned().collect();

        for _ in 0..steps {
            let user = self.users[self.rng.gen_range(0..self.users.len())].clone();
            let asset = assets[self.rng.gen_range(0..assets.len())].clone();

            match self.rng.gen_range(0..20) {
                0..=8 => {
                    let amount = self.random_amount(&market, &asset, prices[&asset])?;
                    self.random_deposit(&market, &user, &asset, amount).await?;
                }
                9..=16 => {
                    let amount = self.withdrawal_amount(&market, &user, &asset)?;
                    self.random_withdrawal(&market, &user, &asset, amount).await?;
                }
                17 => {
                    let amount = self.withdrawal_amount(&market, &user, &asset)?;
                    let outcome = market.reentrant_withdraw(&user, &asset, amount).await;
                    if let Some((_, nested)) = &outcome.nested {
                        if nested.as_ref().err() != Some(&BankError::OperationInProgress) {
                            bail!("nested withdrawal was not refused: {:?}", nested);
                        }
                    }
                    self.record(&outcome.outer, 0);
                }
                _ => {
                    let price = self.move_price(prices[&asset]);
                    market.prices.set_price(asset.clone(), price, PRICE_DECIMALS);
                    prices.insert(asset.clone(), price);
                    self.metrics.record_price_move();
                    debug!(asset = %asset, price, "Price moved");
                }
            }

            market.check_invariants()?;
        }

        self.bank_metrics = Some(market.bank.metrics().snapshot());
        Ok(())
    }

    /// Get simulation metrics.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Get bank metrics of the last run.
    pub fn bank_metrics(&self) -> Option<&MetricsSnapshot> {
        self.bank_metrics.as_ref()
    }

    // --- Private methods ---

    async fn execute_step(&mut self, market: &Market, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::ListAsset {
                code,
                decimals,
                price,
                price_decimals,
            } => {
                market.list(code, *decimals, *price, *price_decimals).await?;
            }
            ScenarioStep::SetPrice {
                asset,
                price,
                decimals,
            } => {
                market.prices.set_price(asset_id(asset), *price, *decimals);
                self.metrics.record_price_move();
            }
            ScenarioStep::Fund {
                user,
                asset,
                amount,
            } => {
                let asset = asset_id(asset);
                let amount = parse_units(amount, market.bank.decimals_of(&asset)?)?;
                market.fund(&UserId::new(user.as_str()), &asset, amount);
            }
            ScenarioStep::Deposit {
                user,
                asset,
                amount,
                expect,
            } => {
                let asset = asset_id(asset);
                let amount = parse_units(amount, market.bank.decimals_of(&asset)?)?;
                let started = Instant::now();
                let result = market
                    .bank
                    .deposit(&UserId::new(user.as_str()), &asset, amount)
                    .await;
                self.record(&result, elapsed_us(started));
                check_expectation(&result, expect)?;
            }
            ScenarioStep::Withdraw {
                user,
                asset,
                amount,
                expect,
            } => {
                let asset = asset_id(asset);
                let amount = parse_units(amount, market.bank.decimals_of(&asset)?)?;
                let started = Instant::now();
                let result = market
                    .bank
                    .withdraw(&UserId::new(user.as_str()), &asset, amount)
                    .await;
                self.record(&result, elapsed_us(started));
                check_expectation(&result, expect)?;
            }
            ScenarioStep::ReentrantWithdraw {
                user,
                asset,
                amount,
            } => {
                let user = UserId::new(user.as_str());
                let asset = asset_id(asset);
                let amount = parse_units(amount, market.bank.decimals_of(&asset)?)?;
                let before = market.bank.balance_of(&user, &asset);

                let outcome = market.reentrant_withdraw(&user, &asset, amount).await;
                self.record(&outcome.outer, 0);
                let record = outcome.outer.context("outer withdrawal failed")?;

                let Some((seen, nested)) = outcome.nested else {
                    bail!("payout never ran");
                };
                if seen != before - record.normalized {
                    bail!("nested call saw {} instead of the debited balance", seen);
                }
                if nested.as_ref().err() != Some(&BankError::OperationInProgress) {
                    bail!("nested withdrawal was not refused: {:?}", nested);
                }
                info!(seen, "Nested withdrawal refused");
            }
            ScenarioStep::Assert { condition } => {
                check_condition(market, condition).await?;
            }
        }

        Ok(())
    }

    async fn random_deposit(
        &mut self,
        market: &Market,
        user: &UserId,
        asset: &AssetId,
        amount: u128,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = market.bank.deposit(user, asset, amount).await;
        self.record(&result, elapsed_us(started));

        if result.is_ok() {
            let valuation = market.bank.total_valuation().await?;
            if valuation > market.bank.bank_cap() {
                bail!("valuation {} above cap after deposit", valuation);
            }
        }
        Ok(())
    }

    async fn random_withdrawal(
        &mut self,
        market: &Market,
        user: &UserId,
        asset: &AssetId,
        amount: u128,
    ) -> anyhow::Result<()> {
        let before = market.bank.balance_of(user, asset);
        let started = Instant::now();
        let result = market.bank.withdraw(user, asset, amount).await;
        self.record(&result, elapsed_us(started));

        match &result {
            Ok(record) => {
                if record.value > market.bank.withdrawal_threshold() {
                    bail!("withdrawal worth {} above ceiling", record.value);
                }
            }
            Err(_) => {
                if market.bank.balance_of(user, asset) != before {
                    bail!("failed withdrawal changed the balance of {}", user);
                }
            }
        }
        Ok(())
    }

    /// A deposit worth between $1 and $4000 at the current price, plus
    /// some dust below the ledger unit.
    fn random_amount(&mut self, market: &Market, asset: &AssetId, price: i128) -> anyhow::Result<u128> {
        let decimals = market.bank.decimals_of(asset)?;
        let whole = pow10(decimals).context("precision too wide")?;
        let scale = pow10(PRICE_DECIMALS).context("precision too wide")?;
        let price = price.max(1).unsigned_abs();

        let dollars: u128 = self.rng.gen_range(1..=4_000);
        let dust: u128 = self.rng.gen_range(0..1_000);
        Ok(dollars * whole * scale / price + dust)
    }

    /// Mostly a share of the current balance; sometimes more than it.
    fn withdrawal_amount(&mut self, market: &Market, user: &UserId, asset: &AssetId) -> anyhow::Result<u128> {
        let balance = market.bank.native_balance_of(user, asset)?;
        if balance == 0 || self.rng.gen_range(0..10) == 0 {
            return Ok(balance + self.rng.gen_range(1..1_000_000u128));
        }
        let percent: u128 = self.rng.gen_range(1..=100);
        Ok((balance * percent / 100).max(1))
    }

    /// Move a price by up to 10% either way; occasionally report zero, and
    /// recover from zero to par.
    fn move_price(&mut self, price: i128) -> i128 {
        if price <= 0 {
            return NATIVE_PRICE;
        }
        if self.rng.gen_range(0..25) == 0 {
            return 0;
        }
        let percent: i128 = self.rng.gen_range(90..=110);
        (price * percent / 100).max(1)
    }

    fn record(&mut self, result: &custodia_common::Result<MovementRecord>, latency_us: u64) {
        match result {
            Ok(_) => self.metrics.record_success(latency_us),
            Err(e) => self.metrics.record_failure(e.error_code(), latency_us),
        }
    }
}

/// Resolve a scenario asset reference.
fn asset_id(code: &str) -> AssetId {
    if code.eq_ignore_ascii_case("native") {
        AssetId::Native
    } else {
        AssetId::token(code)
    }
}

fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn check_expectation(
    result: &custodia_common::Result<MovementRecord>,
    expect: &Expect,
) -> anyhow::Result<()> {
    match (result, expect) {
        (Ok(_), Expect::Success) => Ok(()),
        (Err(e), Expect::Failure { code }) if e.error_code() == code.as_str() => Ok(()),
        (Ok(record), Expect::Failure { code }) => {
            bail!("expected {} but operation succeeded: {:?}", code, record)
        }
        (Err(e), _) => bail!("unexpected failure {}: {}", e.error_code(), e),
    }
}

async fn check_condition(market: &Market, condition: &AssertCondition) -> anyhow::Result<()> {
    match condition {
        AssertCondition::BalanceEquals {
            user,
            asset,
            normalized,
        } => {
            let actual = market
                .bank
                .balance_of(&UserId::new(user.as_str()), &asset_id(asset));
            if actual != u128::from(*normalized) {
                bail!("balance of {} in {} is {}, expected {}", user, asset, actual, normalized);
            }
        }
        AssertCondition::AvailableCapacity { amount } => {
            let expected = parse_units(amount, REFERENCE_DECIMALS)?;
            let actual = market.bank.available_capacity().await?;
            if actual != expected {
                bail!("available capacity is {}, expected {}", actual, expected);
            }
        }
        AssertCondition::ValuationFails { code } => match market.bank.total_valuation().await {
            Err(e) if e.error_code() == code.as_str() => {}
            Err(e) => bail!("valuation failed with {}, expected {}", e.error_code(), code),
            Ok(value) => bail!("valuation succeeded with {}, expected {}", value, code),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::SCENARIOS;

    #[tokio::test]
    async fn test_named_scenarios_pass() {
        let mut controller = SimulationController::new(BankConfig::default(), 2, Some(7));

        for name in SCENARIOS {
            let scenario = Scenario::load(name).unwrap();
            controller.run_scenario(&scenario).await.unwrap();
        }

        assert!(controller.metrics().successful_operations > 0);
        assert_eq!(
            controller.metrics().failures_by_code["BANK_CAP_EXCEEDED"],
            1
        );
    }

    #[tokio::test]
    async fn test_seeded_run_holds_invariants() {
        let mut controller = SimulationController::new(BankConfig::default(), 3, Some(42));

        controller.run(300).await.unwrap();

        let metrics = controller.metrics();
        assert_eq!(
            metrics.total_operations + metrics.price_moves,
            300
        );
        assert!(controller.bank_metrics().is_some());
    }

    #[test]
    fn test_asset_reference() {
        assert_eq!(asset_id("native"), AssetId::Native);
        assert_eq!(asset_id("usdc"), AssetId::token("USDC"));
    }
}

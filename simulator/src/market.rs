//! Simulated market: a bank wired to in-memory prices and transfers.

use std::sync::{Arc, Weak};

use anyhow::{bail, Context};
use async_trait::async_trait;
use parking_lot::Mutex;

use custodia_bank::{Bank, BankConfig, InMemoryTransfers, OperationState, PushHook};
use custodia_common::{scale, AssetId, FeedId, MovementRecord, Result, UserId};
use custodia_valuation::MockPriceSource;

/// A bank together with the collaborators the simulator controls.
pub struct Market {
    /// The bank under test.
    pub bank: Arc<Bank>,
    /// Settable price feed shared by every asset.
    pub prices: Arc<MockPriceSource>,
    /// In-memory wallets and custody.
    pub transfers: Arc<InMemoryTransfers>,
    admin: UserId,
}

/// What a withdrawal observed when its payout tried to withdraw again.
#[derive(Debug)]
pub struct ReentrancyOutcome {
    /// Result of the outer withdrawal.
    pub outer: Result<MovementRecord>,
    /// Balance the nested call saw, and the nested result. `None` when the
    /// outer call never reached its payout.
    pub nested: Option<(u128, Result<MovementRecord>)>,
}

impl Market {
    /// Open a market whose native asset trades at `price` with
    /// `price_decimals` fractional digits.
    pub fn open(config: BankConfig, price: i128, price_decimals: u8) -> anyhow::Result<Self> {
        let prices = Arc::new(MockPriceSource::new("simulated"));
        prices.set_price(AssetId::Native, price, price_decimals);
        let transfers = Arc::new(InMemoryTransfers::new());
        let admin = config.admin.clone();

        let bank = Bank::new(config, prices.clone(), transfers.clone())
            .context("failed to open bank")?;

        Ok(Self {
            bank: Arc::new(bank),
            prices,
            transfers,
            admin,
        })
    }

    /// Declare and register a fungible asset.
    pub async fn list(
        &self,
        code: &str,
        decimals: u8,
        price: i128,
        price_decimals: u8,
    ) -> anyhow::Result<AssetId> {
        let asset = AssetId::token(code);
        self.transfers.declare(asset.clone(), decimals);
        self.prices.set_price(asset.clone(), price, price_decimals);
        self.bank
            .register_asset(
                &self.admin,
                asset.clone(),
                FeedId::new(format!("{}/USD", asset.code())),
                self.prices.clone(),
            )
            .await
            .with_context(|| format!("failed to list {}", asset))?;
        Ok(asset)
    }

    /// Give a user wallet funds. Native value travels with the deposit call,
    /// so only fungible assets need funding.
    pub fn fund(&self, user: &UserId, asset: &AssetId, amount: u128) {
        if !asset.is_native() {
            self.transfers.mint(user, asset, amount);
        }
    }

    /// Withdraw while the payout attempts the same withdrawal again.
    pub async fn reentrant_withdraw(
        &self,
        user: &UserId,
        asset: &AssetId,
        amount: u128,
    ) -> ReentrancyOutcome {
        let hook = Arc::new(NestedWithdrawal {
            bank: Arc::downgrade(&self.bank),
            observed: Mutex::new(None),
        });
        self.transfers.set_push_hook(hook.clone());

        let outer = self.bank.withdraw(user, asset, amount).await;
        self.transfers.clear_push_hook();

        let nested = hook.observed.lock().take();
        ReentrancyOutcome { outer, nested }
    }

    /// Check the invariants that hold regardless of prices.
    pub fn check_invariants(&self) -> anyhow::Result<()> {
        self.bank
            .verify_integrity()
            .context("ledger conservation violated")?;

        if self.bank.state() != OperationState::Idle {
            bail!("bank left in {:?} after operation", self.bank.state());
        }

        for asset in self.bank.supported_assets() {
            if asset.is_native() {
                continue;
            }
            let decimals = self.bank.decimals_of(&asset)?;
            let owed = scale::from_ledger(decimals, self.bank.total_of(&asset))?;
            let held = self.transfers.custody_of(&asset);
            if held < owed {
                bail!("custody of {} holds {} but owes {}", asset, held, owed);
            }
        }

        Ok(())
    }
}

/// Push hook that tries to withdraw the payout a second time.
struct NestedWithdrawal {
    bank: Weak<Bank>,
    observed: Mutex<Option<(u128, Result<MovementRecord>)>>,
}

#[async_trait]
impl PushHook for NestedWithdrawal {
    async fn on_push(&self, to: &UserId, asset: &AssetId, amount: u128) {
        let Some(bank) = self.bank.upgrade() else {
            return;
        };
        let balance = bank.balance_of(to, asset);
        let nested = bank.withdraw(to, asset, amount).await;
        *self.observed.lock() = Some((balance, nested));
    }
}

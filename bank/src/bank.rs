//! Deposit and withdrawal orchestration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use custodia_common::{
    scale, AssetId, AssetRecord, BankError, BankEvent, FeedId, MovementRecord, Result, UserId,
};
use custodia_ledger::{IntegrityViolation, JournalEntry, Ledger};
use custodia_valuation::{AssetBinding, AssetRegistry, PriceSource, ValuationStats};

use crate::config::BankConfig;
use crate::enforcer::{Holding, InvariantEnforcer};
use crate::metrics::{Metrics, SharedMetrics};
use crate::state::{OperationGate, OperationKind, OperationState};
use crate::transfer::AssetTransfer;

/// Multi-asset custodial bank.
///
/// Every mutating call passes through one [`OperationGate`]: checks run
/// first, then the ledger effect, then the outgoing transfer. Calls from
/// independent tasks are queued; a call made from inside a running
/// operation's transfer is refused.
pub struct Bank {
    bank_cap: u128,
    withdrawal_threshold: u128,
    admin: UserId,
    registry: RwLock<AssetRegistry>,
    ledger: Mutex<Ledger>,
    gate: OperationGate,
    enforcer: InvariantEnforcer,
    transfers: Arc<dyn AssetTransfer>,
    events: broadcast::Sender<BankEvent>,
    metrics: SharedMetrics,
    deposit_count: AtomicU64,
    withdrawal_count: AtomicU64,
}

impl Bank {
    /// Create a bank holding only the native asset binding.
    pub fn new(
        config: BankConfig,
        native_source: Arc<dyn PriceSource>,
        transfers: Arc<dyn AssetTransfer>,
    ) -> Result<Self> {
        config.validate().map_err(BankError::ConfigurationError)?;

        let (events, _) = broadcast::channel(config.event_buffer);

        info!(
            admin = %config.admin,
            native_feed = %config.native_feed,
            bank_cap = config.bank_cap,
            withdrawal_threshold = config.withdrawal_threshold,
            "Bank created"
        );

        Ok(Self {
            bank_cap: config.bank_cap,
            withdrawal_threshold: config.withdrawal_threshold,
            admin: config.admin,
            registry: RwLock::new(AssetRegistry::new(config.native_feed, native_source)),
            ledger: Mutex::new(Ledger::new()),
            gate: OperationGate::new(),
            enforcer: InvariantEnforcer::new(config.bank_cap, config.withdrawal_threshold),
            transfers,
            events,
            metrics: Arc::new(Metrics::new()),
            deposit_count: AtomicU64::new(0),
            withdrawal_count: AtomicU64::new(0),
        })
    }

    /// Deposit `amount` (native precision) of `asset` for `user`.
    #[instrument(skip(self), fields(user = %user, asset = %asset))]
    pub async fn deposit(&self, user: &UserId, asset: &AssetId, amount: u128) -> Result<MovementRecord> {
        let operation = self.execute_deposit(user, asset, amount);
        match self.serialized(OperationKind::Deposit, operation).await {
            Ok(record) => {
                self.deposit_count.fetch_add(1, Ordering::Relaxed);
                self.metrics.deposit_accepted();
                info!(
                    amount,
                    normalized = record.normalized,
                    value = record.value,
                    "Deposit accepted"
                );
                self.publish(BankEvent::Deposit(record.clone()));
                Ok(record)
            }
            Err(e) => {
                self.metrics.deposit_rejected();
                warn!(amount, code = e.error_code(), error = %e, "Deposit rejected");
                Err(e)
            }
        }
    }

    /// Withdraw `amount` (native precision) of `asset` to `user`.
    ///
    /// The payout is settled at ledger precision: digits below the ledger
    /// unit stay in the request and are neither debited nor paid out.
    #[instrument(skip(self), fields(user = %user, asset = %asset))]
    pub async fn withdraw(&self, user: &UserId, asset: &AssetId, amount: u128) -> Result<MovementRecord> {
        let operation = self.execute_withdrawal(user, asset, amount);
        match self.serialized(OperationKind::Withdrawal, operation).await {
            Ok(record) => {
                self.withdrawal_count.fetch_add(1, Ordering::Relaxed);
                self.metrics.withdrawal_accepted();
                info!(
                    amount,
                    paid = record.amount,
                    normalized = record.normalized,
                    value = record.value,
                    "Withdrawal accepted"
                );
                self.publish(BankEvent::Withdrawal(record.clone()));
                Ok(record)
            }
            Err(e) => {
                self.metrics.withdrawal_rejected();
                warn!(amount, code = e.error_code(), error = %e, "Withdrawal rejected");
                Err(e)
            }
        }
    }

    /// Bind a fungible asset to a price feed. Admin only.
    ///
    /// The asset's precision is read from the transfer service.
    #[instrument(skip(self, source), fields(caller = %caller, asset = %asset, feed = %feed))]
    pub async fn register_asset(
        &self,
        caller: &UserId,
        asset: AssetId,
        feed: FeedId,
        source: Arc<dyn PriceSource>,
    ) -> Result<AssetRecord> {
        self.authorize(caller)?;
        let operation = self.execute_registration(asset, feed, source);
        self.serialized(OperationKind::Registry, operation).await
    }

    /// Remove an asset's binding. Admin only; the asset total must be zero.
    #[instrument(skip(self), fields(caller = %caller, asset = %asset))]
    pub async fn deregister_asset(&self, caller: &UserId, asset: &AssetId) -> Result<AssetRecord> {
        self.authorize(caller)?;
        let operation = self.execute_deregistration(asset);
        self.serialized(OperationKind::Registry, operation).await
    }

    /// Subscribe to the record stream.
    pub fn subscribe(&self) -> broadcast::Receiver<BankEvent> {
        self.events.subscribe()
    }

    /// A user's stored balance at ledger precision.
    pub fn balance_of(&self, user: &UserId, asset: &AssetId) -> u128 {
        self.ledger.lock().balance_of(user, asset)
    }

    /// A user's stored balance in the asset's native precision.
    pub fn native_balance_of(&self, user: &UserId, asset: &AssetId) -> Result<u128> {
        let decimals = self.registry.read().get(asset)?.decimals;
        scale::from_ledger(decimals, self.balance_of(user, asset))
    }

    /// All of a user's nonzero balances at ledger precision.
    pub fn balances_of(&self, user: &UserId) -> Vec<(AssetId, u128)> {
        self.ledger.lock().balances_of(user)
    }

    /// An asset's stored total at ledger precision.
    pub fn total_of(&self, asset: &AssetId) -> u128 {
        self.ledger.lock().total_of(asset)
    }

    /// Supported assets, native first.
    pub fn supported_assets(&self) -> Vec<AssetId> {
        self.registry.read().assets()
    }

    /// Check if an asset is supported.
    pub fn is_supported(&self, asset: &AssetId) -> bool {
        self.registry.read().contains(asset)
    }

    /// Declared precision of a supported asset.
    pub fn decimals_of(&self, asset: &AssetId) -> Result<u8> {
        Ok(self.registry.read().get(asset)?.decimals)
    }

    /// Global capacity in reference units.
    pub fn bank_cap(&self) -> u128 {
        self.bank_cap
    }

    /// Per-withdrawal ceiling in reference units.
    pub fn withdrawal_threshold(&self) -> u128 {
        self.withdrawal_threshold
    }

    /// Current global valuation, recomputed from live prices.
    pub async fn total_valuation(&self) -> Result<u128> {
        let holdings = self.holdings()?;
        self.enforcer.current_valuation(&holdings).await
    }

    /// Value that can still be deposited before reaching the cap.
    pub async fn available_capacity(&self) -> Result<u128> {
        Ok(self.bank_cap.saturating_sub(self.total_valuation().await?))
    }

    /// Reference-currency value of a native amount of a supported asset.
    pub async fn value_of(&self, asset: &AssetId, amount: u128) -> Result<u128> {
        let binding = self.binding(asset)?;
        Ok(self.enforcer.value_of(&binding, amount).await?.value)
    }

    /// Successful deposits so far.
    pub fn deposit_count(&self) -> u64 {
        self.deposit_count.load(Ordering::Relaxed)
    }

    /// Successful withdrawals so far.
    pub fn withdrawal_count(&self) -> u64 {
        self.withdrawal_count.load(Ordering::Relaxed)
    }

    /// Current operation state.
    pub fn state(&self) -> OperationState {
        self.gate.state()
    }

    /// Bank metrics.
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Feed read statistics.
    pub fn valuation_stats(&self) -> ValuationStats {
        self.enforcer.stats()
    }

    /// Ledger journal, oldest first.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.ledger.lock().entries().to_vec()
    }

    /// Check ledger conservation for every asset.
    pub fn verify_integrity(&self) -> std::result::Result<(), IntegrityViolation> {
        self.ledger.lock().verify_integrity()
    }

    // --- Private methods ---

    async fn execute_registration(
        &self,
        asset: AssetId,
        feed: FeedId,
        source: Arc<dyn PriceSource>,
    ) -> Result<AssetRecord> {
        if self.registry.read().contains(&asset) {
            return Err(BankError::AssetAlreadySupported(asset));
        }

        let decimals = self
            .transfers
            .decimals(&asset)
            .await
            .map_err(|e| BankError::TransferFailed {
                asset: asset.clone(),
                reason: e.to_string(),
            })?;

        let record = AssetRecord::new(asset.clone(), feed.clone());
        {
            let mut registry = self.registry.write();
            registry.register(AssetBinding::new(asset, feed, source, decimals))?;
            self.metrics.set_assets_supported(registry.len() as u64);
        }

        self.publish(BankEvent::AssetRegistered(record.clone()));
        Ok(record)
    }

    async fn execute_deregistration(&self, asset: &AssetId) -> Result<AssetRecord> {
        if !asset.is_native() {
            self.registry.read().get(asset)?;
        }

        let total = self.ledger.lock().total_of(asset);
        if total > 0 {
            warn!(total, "Deregistration refused, asset still holds value");
            return Err(BankError::AssetHasBalance {
                asset: asset.clone(),
                total,
            });
        }

        let binding = {
            let mut registry = self.registry.write();
            let binding = registry.deregister(asset)?;
            self.metrics.set_assets_supported(registry.len() as u64);
            binding
        };

        let record = AssetRecord::new(binding.asset, binding.feed);
        self.publish(BankEvent::AssetDeregistered(record.clone()));
        Ok(record)
    }

    async fn execute_deposit(&self, user: &UserId, asset: &AssetId, amount: u128) -> Result<MovementRecord> {
        if amount == 0 {
            return Err(BankError::ZeroAmount);
        }
        let binding = self.binding(asset)?;
        let normalized = scale::to_ledger(binding.decimals, amount)?;

        if !asset.is_native() {
            self.transfers
                .pull(user, asset, amount)
                .await
                .map_err(|e| {
                    self.metrics.transfer_failed();
                    BankError::TransferFailed {
                        asset: asset.clone(),
                        reason: e.to_string(),
                    }
                })?;
        }

        let holdings = self.holdings()?;
        let valuation = match self.enforcer.check_capacity(&holdings, &binding, amount).await {
            Ok(valuation) => valuation,
            Err(e) => {
                if !asset.is_native() {
                    self.refund(user, asset, amount).await;
                }
                return Err(e);
            }
        };

        self.ledger.lock().credit(user, asset, normalized);

        Ok(MovementRecord::deposit(
            user.clone(),
            asset.clone(),
            amount,
            normalized,
            valuation.value,
        ))
    }

    async fn execute_withdrawal(&self, user: &UserId, asset: &AssetId, amount: u128) -> Result<MovementRecord> {
        if amount == 0 {
            return Err(BankError::ZeroAmount);
        }
        let binding = self.binding(asset)?;

        let normalized = scale::to_ledger(binding.decimals, amount)?;
        if normalized == 0 {
            return Err(BankError::ZeroAmount);
        }
        let payout = scale::from_ledger(binding.decimals, normalized)?;

        self.ledger.lock().can_debit(user, asset, normalized)?;
        let requested = self.enforcer.check_withdrawal_ceiling(&binding, amount).await?;
        let value = if payout == amount {
            requested.value
        } else {
            self.enforcer.value_of(&binding, payout).await?.value
        };

        let debit = self.ledger.lock().debit(user, asset, normalized)?;

        if let Err(e) = self.transfers.push(user, asset, payout).await {
            self.metrics.transfer_failed();
            self.ledger.lock().reverse(&debit)?;
            self.metrics.compensated();
            error!(payout, error = %e, "Payout failed, debit reversed");
            return Err(BankError::TransferFailed {
                asset: asset.clone(),
                reason: e.to_string(),
            });
        }

        Ok(MovementRecord::withdrawal(
            user.clone(),
            asset.clone(),
            payout,
            normalized,
            value,
        ))
    }

    /// Return a pulled deposit to its owner.
    async fn refund(&self, user: &UserId, asset: &AssetId, amount: u128) {
        match self.transfers.push(user, asset, amount).await {
            Ok(()) => {
                self.metrics.compensated();
                info!(user = %user, asset = %asset, amount, "Deposit refunded");
            }
            Err(e) => {
                self.metrics.transfer_failed();
                error!(user = %user, asset = %asset, amount, error = %e, "Deposit refund failed");
            }
        }
    }

    async fn serialized<F, T>(&self, kind: OperationKind, operation: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let result = self.gate.run(kind, operation).await;
        if matches!(result, Err(BankError::OperationInProgress)) {
            self.metrics.reentrant_call_blocked();
        }
        result
    }

    fn authorize(&self, caller: &UserId) -> Result<()> {
        if *caller != self.admin {
            warn!(caller = %caller, "Unauthorized registry call");
            return Err(BankError::Unauthorized(caller.clone()));
        }
        Ok(())
    }

    fn binding(&self, asset: &AssetId) -> Result<AssetBinding> {
        self.registry.read().get(asset).cloned()
    }

    /// Bindings paired with their nonzero stored totals.
    fn holdings(&self) -> Result<Vec<Holding>> {
        let registry = self.registry.read();
        let ledger = self.ledger.lock();
        ledger
            .nonzero_totals()
            .into_iter()
            .map(|(asset, total)| -> Result<Holding> { Ok((registry.get(&asset)?.clone(), total)) })
            .collect()
    }

    fn publish(&self, event: BankEvent) {
        // no subscribers is not an error
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{InMemoryTransfers, PushHook};
    use async_trait::async_trait;
    use custodia_ledger::EntryType;
    use custodia_valuation::{MockPriceSource, PriceQuote, ValuationResult};
    use proptest::prelude::*;
    use std::sync::Weak;

    const ONE: u128 = 1_000_000_000_000_000_000;

    struct Fixture {
        bank: Arc<Bank>,
        prices: Arc<MockPriceSource>,
        transfers: Arc<InMemoryTransfers>,
    }

    fn admin() -> UserId {
        UserId::new("admin")
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn setup_bank() -> Fixture {
        let prices = Arc::new(MockPriceSource::new("test"));
        // $1.00000000 per native unit keeps values equal to amounts
        prices.set_price(AssetId::Native, 1_00000000, 8);
        let transfers = Arc::new(InMemoryTransfers::new());
        let bank = Bank::new(BankConfig::default(), prices.clone(), transfers.clone()).unwrap();
        Fixture {
            bank: Arc::new(bank),
            prices,
            transfers,
        }
    }

    async fn register(fx: &Fixture, code: &str, decimals: u8, price: i128, price_decimals: u8) -> AssetId {
        let asset = AssetId::token(code);
        fx.transfers.declare(asset.clone(), decimals);
        fx.prices.set_price(asset.clone(), price, price_decimals);
        let feed = FeedId::new(format!("{}/USD", code.to_uppercase()));
        fx.bank
            .register_asset(&admin(), asset.clone(), feed, fx.prices.clone())
            .await
            .unwrap();
        asset
    }

    #[tokio::test]
    async fn test_eight_decimal_deposit_normalizes() {
        let fx = setup_bank();
        let wbtc = register(&fx, "wbtc", 8, 1_00000000, 8).await;
        fx.transfers.mint(&alice(), &wbtc, 100_000_000);

        let record = fx.bank.deposit(&alice(), &wbtc, 100_000_000).await.unwrap();

        assert_eq!(record.normalized, 1_000_000);
        assert_eq!(record.value, ONE);
        assert_eq!(fx.bank.balance_of(&alice(), &wbtc), 1_000_000);
        assert_eq!(fx.bank.native_balance_of(&alice(), &wbtc).unwrap(), 100_000_000);
        assert_eq!(fx.transfers.custody_of(&wbtc), 100_000_000);
        assert_eq!(fx.bank.deposit_count(), 1);
    }

    #[tokio::test]
    async fn test_cap_exceeded_reports_available() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, 49_999 * ONE).await.unwrap();

        let result = fx.bank.deposit(&alice(), &AssetId::Native, 2 * ONE).await;

        assert_eq!(
            result.unwrap_err(),
            BankError::BankCapExceeded {
                requested: 2 * ONE,
                available: ONE,
            }
        );
        assert_eq!(fx.bank.total_of(&AssetId::Native), 49_999_000_000);
        assert_eq!(fx.bank.available_capacity().await.unwrap(), ONE);
    }

    #[tokio::test]
    async fn test_cap_failure_refunds_pulled_deposit() {
        let fx = setup_bank();
        let usdc = register(&fx, "usdc", 6, 1_00000000, 8).await;
        fx.transfers.mint(&alice(), &usdc, 60_000_000_000);

        let result = fx.bank.deposit(&alice(), &usdc, 60_000_000_000).await;

        assert!(matches!(result, Err(BankError::BankCapExceeded { .. })));
        assert_eq!(fx.transfers.wallet_of(&alice(), &usdc), 60_000_000_000);
        assert_eq!(fx.transfers.custody_of(&usdc), 0);
        assert_eq!(fx.bank.total_of(&usdc), 0);
        assert_eq!(fx.bank.metrics().snapshot().compensations, 1);
    }

    #[tokio::test]
    async fn test_withdrawal_ceiling_is_inclusive() {
        let fx = setup_bank();
        // whole units priced at 10^-18: one unit is worth one reference unit
        let unit = register(&fx, "unit", 0, 1, 18).await;
        fx.transfers.mint(&alice(), &unit, 20_000 * ONE);
        fx.bank.deposit(&alice(), &unit, 20_000 * ONE).await.unwrap();

        let record = fx.bank.withdraw(&alice(), &unit, 5_000 * ONE).await.unwrap();
        assert_eq!(record.value, 5_000 * ONE);

        let result = fx.bank.withdraw(&alice(), &unit, 5_000 * ONE + 1).await;

        assert_eq!(
            result.unwrap_err(),
            BankError::WithdrawalThresholdExceeded {
                requested: 5_000 * ONE + 1,
                threshold: 5_000 * ONE,
            }
        );
        assert_eq!(fx.bank.balance_of(&alice(), &unit), 15_000 * ONE * 1_000_000);
        assert_eq!(fx.bank.withdrawal_count(), 1);
    }

    #[tokio::test]
    async fn test_native_withdrawal_over_ceiling() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, 20_000 * ONE).await.unwrap();

        // a price one feed unit above par puts 5000 units just over the ceiling
        fx.prices.set_price(AssetId::Native, 1_000_000_000_000_000_001, 18);
        let result = fx.bank.withdraw(&alice(), &AssetId::Native, 5_000 * ONE).await;

        assert!(matches!(
            result,
            Err(BankError::WithdrawalThresholdExceeded { threshold, .. }) if threshold == 5_000 * ONE
        ));
        assert_eq!(fx.bank.balance_of(&alice(), &AssetId::Native), 20_000_000_000);
    }

    #[tokio::test]
    async fn test_native_ceiling_checks_requested_amount() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, 20_000 * ONE).await.unwrap();

        let record = fx.bank.withdraw(&alice(), &AssetId::Native, 5_000 * ONE).await.unwrap();
        assert_eq!(record.value, 5_000 * ONE);

        // one wei over: the payout would truncate back to 5000, the request does not
        let result = fx.bank.withdraw(&alice(), &AssetId::Native, 5_000 * ONE + 1).await;

        assert_eq!(
            result.unwrap_err(),
            BankError::WithdrawalThresholdExceeded {
                requested: 5_000 * ONE + 1,
                threshold: 5_000 * ONE,
            }
        );
        assert_eq!(fx.bank.balance_of(&alice(), &AssetId::Native), 15_000_000_000);
        assert_eq!(fx.transfers.wallet_of(&alice(), &AssetId::Native), 5_000 * ONE);
    }

    #[tokio::test]
    async fn test_zero_price_blocks_everything() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, ONE).await.unwrap();
        fx.prices.set_price(AssetId::Native, 0, 8);

        let deposit = fx.bank.deposit(&alice(), &AssetId::Native, ONE).await;
        let withdrawal = fx.bank.withdraw(&alice(), &AssetId::Native, ONE).await;
        let valuation = fx.bank.total_valuation().await;

        assert!(matches!(deposit, Err(BankError::InvalidPriceData { .. })));
        assert!(matches!(withdrawal, Err(BankError::InvalidPriceData { .. })));
        assert!(matches!(valuation, Err(BankError::InvalidPriceData { .. })));
        assert_eq!(fx.bank.balance_of(&alice(), &AssetId::Native), 1_000_000);
    }

    #[tokio::test]
    async fn test_zero_and_unsupported_rejected() {
        let fx = setup_bank();

        assert_eq!(
            fx.bank.deposit(&alice(), &AssetId::Native, 0).await,
            Err(BankError::ZeroAmount)
        );
        assert_eq!(
            fx.bank.withdraw(&alice(), &AssetId::Native, 0).await,
            Err(BankError::ZeroAmount)
        );
        let dai = AssetId::token("dai");
        assert_eq!(
            fx.bank.deposit(&alice(), &dai, 1).await,
            Err(BankError::AssetNotSupported(dai))
        );
        assert_eq!(fx.bank.metrics().snapshot().deposits_rejected, 2);
    }

    #[tokio::test]
    async fn test_sub_unit_withdrawal_is_zero() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, ONE).await.unwrap();

        // below one ledger unit (10^12 wei)
        let result = fx.bank.withdraw(&alice(), &AssetId::Native, 999_999_999_999).await;

        assert_eq!(result, Err(BankError::ZeroAmount));
        assert_eq!(fx.transfers.wallet_of(&alice(), &AssetId::Native), 0);
    }

    #[tokio::test]
    async fn test_withdrawal_pays_settleable_amount() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, ONE).await.unwrap();

        let record = fx
            .bank
            .withdraw(&alice(), &AssetId::Native, 1_500_000_000_123)
            .await
            .unwrap();

        assert_eq!(record.amount, 1_000_000_000_000);
        assert_eq!(record.normalized, 1);
        assert_eq!(
            fx.transfers.wallet_of(&alice(), &AssetId::Native),
            1_000_000_000_000
        );
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, ONE).await.unwrap();

        let result = fx.bank.withdraw(&alice(), &AssetId::Native, 2 * ONE).await;

        assert_eq!(
            result.unwrap_err(),
            BankError::InsufficientBalance {
                user: alice(),
                asset: AssetId::Native,
                requested: 2_000_000,
                available: 1_000_000,
            }
        );
    }

    #[tokio::test]
    async fn test_failed_push_restores_debit() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, 10 * ONE).await.unwrap();
        fx.transfers.fail_pushes(true);

        let result = fx.bank.withdraw(&alice(), &AssetId::Native, 4 * ONE).await;

        assert!(matches!(result, Err(BankError::TransferFailed { .. })));
        assert_eq!(fx.bank.balance_of(&alice(), &AssetId::Native), 10_000_000);
        assert_eq!(fx.bank.total_of(&AssetId::Native), 10_000_000);
        assert_eq!(fx.bank.withdrawal_count(), 0);
        assert!(fx.bank.verify_integrity().is_ok());

        let journal = fx.bank.journal();
        let (debit, reversal) = (&journal[1], &journal[2]);
        assert_eq!(debit.entry_type, EntryType::Debit);
        assert!(reversal.is_reversal());
        assert_eq!(reversal.reverses, Some(debit.id));
        assert_eq!(reversal.amount, 4_000_000);
    }

    #[tokio::test]
    async fn test_failed_pull_leaves_no_trace() {
        let fx = setup_bank();
        let usdc = register(&fx, "usdc", 6, 1_00000000, 8).await;

        let result = fx.bank.deposit(&alice(), &usdc, 1_000_000).await;

        assert!(matches!(result, Err(BankError::TransferFailed { .. })));
        assert_eq!(fx.bank.total_of(&usdc), 0);
        assert!(fx.bank.journal().is_empty());
    }

    /// Tries a second withdrawal from inside the payout.
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

    #[tokio::test]
    async fn test_reentrant_withdrawal_sees_debited_balance() {
        let fx = setup_bank();
        fx.bank.deposit(&alice(), &AssetId::Native, 3 * ONE).await.unwrap();
        let hook = Arc::new(NestedWithdrawal {
            bank: Arc::downgrade(&fx.bank),
            observed: Mutex::new(None),
        });
        fx.transfers.set_push_hook(hook.clone());

        fx.bank.withdraw(&alice(), &AssetId::Native, 2 * ONE).await.unwrap();

        let (balance, nested) = hook.observed.lock().take().unwrap();
        assert_eq!(balance, 1_000_000);
        assert_eq!(nested, Err(BankError::OperationInProgress));
        assert_eq!(fx.bank.balance_of(&alice(), &AssetId::Native), 1_000_000);
        assert_eq!(fx.transfers.wallet_of(&alice(), &AssetId::Native), 2 * ONE);
        assert_eq!(fx.bank.metrics().snapshot().reentrant_calls_blocked, 1);
        assert_eq!(fx.bank.state(), OperationState::Idle);
        assert!(fx.bank.verify_integrity().is_ok());
    }

    /// Yields before answering, so concurrent operations interleave.
    struct YieldingPrices(Arc<MockPriceSource>);

    #[async_trait]
    impl PriceSource for YieldingPrices {
        fn name(&self) -> &str {
            "yielding"
        }

        async fn latest_price(&self, asset: &AssetId) -> ValuationResult<PriceQuote> {
            tokio::task::yield_now().await;
            self.0.latest_price(asset).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_deposits_are_queued() {
        let prices = Arc::new(MockPriceSource::new("test"));
        prices.set_price(AssetId::Native, 1_00000000, 8);
        let bank = Bank::new(
            BankConfig::default(),
            Arc::new(YieldingPrices(prices)),
            Arc::new(InMemoryTransfers::new()),
        )
        .unwrap();
        let bob = UserId::new("bob");
        let alice = alice();

        let (first, second) = tokio::join!(
            bank.deposit(&alice, &AssetId::Native, ONE),
            bank.deposit(&bob, &AssetId::Native, 2 * ONE),
        );

        assert_eq!(first.unwrap().value, ONE);
        assert_eq!(second.unwrap().value, 2 * ONE);
        assert_eq!(bank.total_of(&AssetId::Native), 3_000_000);
        assert_eq!(bank.deposit_count(), 2);
        assert_eq!(bank.metrics().snapshot().reentrant_calls_blocked, 0);
        assert_eq!(bank.state(), OperationState::Idle);
    }

    #[tokio::test]
    async fn test_spawned_operations_share_the_bank() {
        let fx = setup_bank();
        let mut tasks = Vec::new();
        for i in 0..8u32 {
            let bank = fx.bank.clone();
            tasks.push(tokio::spawn(async move {
                let user = UserId::new(format!("user-{i}"));
                bank.deposit(&user, &AssetId::Native, 10 * ONE).await?;
                tokio::task::yield_now().await;
                bank.withdraw(&user, &AssetId::Native, 4 * ONE).await
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(fx.bank.total_of(&AssetId::Native), 48_000_000);
        assert!(fx.bank.verify_integrity().is_ok());
    }

    #[tokio::test]
    async fn test_registry_admin_only() {
        let fx = setup_bank();
        let usdc = AssetId::token("usdc");
        fx.transfers.declare(usdc.clone(), 6);

        let result = fx
            .bank
            .register_asset(&alice(), usdc.clone(), FeedId::new("USDC/USD"), fx.prices.clone())
            .await;
        assert_eq!(result.unwrap_err(), BankError::Unauthorized(alice()));

        let result = fx.bank.deregister_asset(&alice(), &AssetId::Native).await;
        assert_eq!(result.unwrap_err(), BankError::Unauthorized(alice()));
    }

    #[tokio::test]
    async fn test_register_collision_and_precision() {
        let fx = setup_bank();
        let usdc = register(&fx, "usdc", 6, 1_00000000, 8).await;
        assert_eq!(fx.bank.decimals_of(&usdc).unwrap(), 6);

        let again = fx
            .bank
            .register_asset(&admin(), usdc.clone(), FeedId::new("USDC/USD"), fx.prices.clone())
            .await;
        assert_eq!(again.unwrap_err(), BankError::AssetAlreadySupported(usdc));

        let native = fx
            .bank
            .register_asset(&admin(), AssetId::Native, FeedId::new("X"), fx.prices.clone())
            .await;
        assert_eq!(native.unwrap_err(), BankError::AssetAlreadySupported(AssetId::Native));

        let odd = AssetId::token("odd");
        fx.transfers.declare(odd.clone(), 40);
        let wide = fx
            .bank
            .register_asset(&admin(), odd, FeedId::new("ODD/USD"), fx.prices.clone())
            .await;
        assert!(matches!(wide, Err(BankError::UnsupportedPrecision { decimals: 40, .. })));
    }

    #[tokio::test]
    async fn test_deregister_requires_zero_total() {
        let fx = setup_bank();
        let usdc = register(&fx, "usdc", 6, 1_00000000, 8).await;
        fx.transfers.mint(&alice(), &usdc, 5_000_000);
        fx.bank.deposit(&alice(), &usdc, 5_000_000).await.unwrap();

        let result = fx.bank.deregister_asset(&admin(), &usdc).await;
        assert_eq!(
            result.unwrap_err(),
            BankError::AssetHasBalance {
                asset: usdc.clone(),
                total: 5_000_000,
            }
        );

        fx.bank.withdraw(&alice(), &usdc, 5_000_000).await.unwrap();
        let record = fx.bank.deregister_asset(&admin(), &usdc).await.unwrap();

        assert_eq!(record.feed, FeedId::new("USDC/USD"));
        assert!(!fx.bank.is_supported(&usdc));
        assert_eq!(
            fx.bank.deposit(&alice(), &usdc, 1).await,
            Err(BankError::AssetNotSupported(usdc))
        );
        assert!(fx.bank.deregister_asset(&admin(), &AssetId::Native).await.is_err());
    }

    #[tokio::test]
    async fn test_records_are_published() {
        let fx = setup_bank();
        let mut events = fx.bank.subscribe();

        let usdc = register(&fx, "usdc", 6, 1_00000000, 8).await;
        fx.bank.deposit(&alice(), &AssetId::Native, ONE).await.unwrap();

        match events.recv().await.unwrap() {
            BankEvent::AssetRegistered(record) => assert_eq!(record.asset, usdc),
            other => panic!("unexpected event: {:?}", other),
        }
        match events.recv().await.unwrap() {
            BankEvent::Deposit(record) => {
                assert_eq!(record.user, alice());
                assert_eq!(record.amount, ONE);
                assert_eq!(record.value, ONE);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_global_valuation_follows_prices() {
        let fx = setup_bank();
        let wbtc = register(&fx, "wbtc", 8, 20_000_00000000, 8).await;
        fx.transfers.mint(&alice(), &wbtc, 100_000_000);
        fx.bank.deposit(&alice(), &wbtc, 100_000_000).await.unwrap();
        fx.bank.deposit(&alice(), &AssetId::Native, 500 * ONE).await.unwrap();

        assert_eq!(fx.bank.total_valuation().await.unwrap(), 20_500 * ONE);

        fx.prices.set_price(wbtc.clone(), 40_000_00000000, 8);
        assert_eq!(fx.bank.total_valuation().await.unwrap(), 40_500 * ONE);
        assert_eq!(fx.bank.available_capacity().await.unwrap(), 9_500 * ONE);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deposit(u64),
        Withdraw(u64),
        Reprice(i128),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..=30_000).prop_map(Op::Deposit),
            (1u64..=8_000).prop_map(Op::Withdraw),
            (50_000_000i128..=200_000_000).prop_map(Op::Reprice),
        ]
    }

    proptest! {
        #[test]
        fn prop_limits_hold_for_every_accepted_operation(ops in prop::collection::vec(op_strategy(), 1..24)) {
            tokio_test::block_on(async {
                let fx = setup_bank();
                for op in ops {
                    match op {
                        Op::Deposit(units) => {
                            if fx.bank.deposit(&alice(), &AssetId::Native, u128::from(units) * ONE).await.is_ok() {
                                let valuation = fx.bank.total_valuation().await.unwrap();
                                assert!(valuation <= fx.bank.bank_cap());
                            }
                        }
                        Op::Withdraw(units) => {
                            if let Ok(record) = fx.bank.withdraw(&alice(), &AssetId::Native, u128::from(units) * ONE).await {
                                assert!(record.value <= fx.bank.withdrawal_threshold());
                            }
                        }
                        Op::Reprice(price) => fx.prices.set_price(AssetId::Native, price, 8),
                    }
                    assert!(fx.bank.verify_integrity().is_ok());
                    assert_eq!(fx.bank.state(), OperationState::Idle);
                }
            });
        }
    }
}

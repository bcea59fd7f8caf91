//! Asset transfer service: moves value into and out of custody.

use async_trait::async_trait;
use thiserror::Error;

use custodia_common::{AssetId, UserId};

/// Failure reported by the transfer service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The service does not know the asset.
    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetId),

    /// The source of the movement holds less than requested.
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u128, available: u128 },

    /// The service refused the movement.
    #[error("Transfer rejected: {0}")]
    Rejected(String),
}

/// Result type for transfer operations.
pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// External service moving assets between users and custody.
///
/// Both movements complete, or fail, before the returned future resolves.
/// Native value arrives with the deposit call itself, so `pull` is only
/// invoked for registered fungible assets; `push` is invoked for every
/// asset, native included.
#[async_trait]
pub trait AssetTransfer: Send + Sync {
    /// Declared native precision of a fungible asset.
    async fn decimals(&self, asset: &AssetId) -> TransferResult<u8>;

    /// Move `amount` of `asset` from `from` into custody.
    async fn pull(&self, from: &UserId, asset: &AssetId, amount: u128) -> TransferResult<()>;

    /// Move `amount` of `asset` out of custody to `to`.
    async fn push(&self, to: &UserId, asset: &AssetId, amount: u128) -> TransferResult<()>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use self::memory::{InMemoryTransfers, PushHook};

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use parking_lot::Mutex;

    use super::{AssetTransfer, TransferError, TransferResult};
    use custodia_common::{AssetId, UserId};

    /// Callback run from inside `push`, before the payout lands.
    ///
    /// Lets tests and the simulator model a recipient that calls back into
    /// the bank while a withdrawal is still in flight.
    #[async_trait]
    pub trait PushHook: Send + Sync {
        /// Called with the arguments of the in-flight push.
        async fn on_push(&self, to: &UserId, asset: &AssetId, amount: u128);
    }

    /// In-memory transfer service for testing.
    ///
    /// Tracks user wallets and custody per asset. Native custody is not
    /// tracked, since native value is carried by the deposit call.
    pub struct InMemoryTransfers {
        decimals: DashMap<AssetId, u8>,
        wallets: DashMap<(UserId, AssetId), u128>,
        custody: DashMap<AssetId, u128>,
        fail_pulls: AtomicBool,
        fail_pushes: AtomicBool,
        push_hook: Mutex<Option<Arc<dyn PushHook>>>,
    }

    impl InMemoryTransfers {
        /// Create an empty service.
        pub fn new() -> Self {
            Self {
                decimals: DashMap::new(),
                wallets: DashMap::new(),
                custody: DashMap::new(),
                fail_pulls: AtomicBool::new(false),
                fail_pushes: AtomicBool::new(false),
                push_hook: Mutex::new(None),
            }
        }

        /// Declare a fungible asset and its precision.
        pub fn declare(&self, asset: AssetId, decimals: u8) {
            self.decimals.insert(asset, decimals);
        }

        /// Credit a user's wallet.
        pub fn mint(&self, user: &UserId, asset: &AssetId, amount: u128) {
            *self
                .wallets
                .entry((user.clone(), asset.clone()))
                .or_insert(0) += amount;
        }

        /// A user's wallet balance.
        pub fn wallet_of(&self, user: &UserId, asset: &AssetId) -> u128 {
            self.wallets
                .get(&(user.clone(), asset.clone()))
                .map(|b| *b)
                .unwrap_or(0)
        }

        /// Amount of a fungible asset held in custody.
        pub fn custody_of(&self, asset: &AssetId) -> u128 {
            self.custody.get(asset).map(|b| *b).unwrap_or(0)
        }

        /// Make every following pull fail.
        pub fn fail_pulls(&self, fail: bool) {
            self.fail_pulls.store(fail, Ordering::SeqCst);
        }

        /// Make every following push fail.
        pub fn fail_pushes(&self, fail: bool) {
            self.fail_pushes.store(fail, Ordering::SeqCst);
        }

        /// Install a hook run inside every push.
        pub fn set_push_hook(&self, hook: Arc<dyn PushHook>) {
            *self.push_hook.lock() = Some(hook);
        }

        /// Remove the push hook.
        pub fn clear_push_hook(&self) {
            *self.push_hook.lock() = None;
        }
    }

    impl Default for InMemoryTransfers {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl AssetTransfer for InMemoryTransfers {
        async fn decimals(&self, asset: &AssetId) -> TransferResult<u8> {
            self.decimals
                .get(asset)
                .map(|d| *d)
                .ok_or_else(|| TransferError::UnknownAsset(asset.clone()))
        }

        async fn pull(&self, from: &UserId, asset: &AssetId, amount: u128) -> TransferResult<()> {
            if self.fail_pulls.load(Ordering::SeqCst) {
                return Err(TransferError::Rejected("pull disabled".to_string()));
            }

            let mut wallet = self
                .wallets
                .entry((from.clone(), asset.clone()))
                .or_insert(0);
            if *wallet < amount {
                return Err(TransferError::InsufficientFunds {
                    requested: amount,
                    available: *wallet,
                });
            }
            *wallet -= amount;
            drop(wallet);

            *self.custody.entry(asset.clone()).or_insert(0) += amount;
            Ok(())
        }

        async fn push(&self, to: &UserId, asset: &AssetId, amount: u128) -> TransferResult<()> {
            let hook = self.push_hook.lock().clone();
            if let Some(hook) = hook {
                hook.on_push(to, asset, amount).await;
            }

            if self.fail_pushes.load(Ordering::SeqCst) {
                return Err(TransferError::Rejected("push disabled".to_string()));
            }

            if !asset.is_native() {
                let mut custody = self.custody.entry(asset.clone()).or_insert(0);
                if *custody < amount {
                    return Err(TransferError::InsufficientFunds {
                        requested: amount,
                        available: *custody,
                    });
                }
                *custody -= amount;
            }

            self.mint(to, asset, amount);
            Ok(())
        }
    }
}

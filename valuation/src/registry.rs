//! Price-source bindings for supported assets.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use custodia_common::{
    AssetId, BankError, FeedId, Result, MAX_ASSET_DECIMALS, NATIVE_DECIMALS,
};
use tracing::info;

use crate::provider::PriceSource;

/// An asset bound to the feed that prices it.
#[derive(Clone)]
pub struct AssetBinding {
    /// Asset being priced.
    pub asset: AssetId,
    /// Handle of the bound feed.
    pub feed: FeedId,
    /// The feed itself.
    pub source: Arc<dyn PriceSource>,
    /// Declared native precision of the asset.
    pub decimals: u8,
}

impl AssetBinding {
    /// Create a new binding.
    pub fn new(asset: AssetId, feed: FeedId, source: Arc<dyn PriceSource>, decimals: u8) -> Self {
        Self {
            asset,
            feed,
            source,
            decimals,
        }
    }
}

impl fmt::Debug for AssetBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetBinding")
            .field("asset", &self.asset)
            .field("feed", &self.feed)
            .field("source", &self.source.name())
            .field("decimals", &self.decimals)
            .finish()
    }
}

/// The set of supported assets, keyed by asset identifier.
///
/// Iteration follows `AssetId` ordering, so global revaluation always visits
/// assets in the same order. The native binding exists from construction
/// and cannot be removed.
#[derive(Debug)]
pub struct AssetRegistry {
    bindings: BTreeMap<AssetId, AssetBinding>,
}

impl AssetRegistry {
    /// Create a registry holding only the native asset.
    pub fn new(native_feed: FeedId, native_source: Arc<dyn PriceSource>) -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert(
            AssetId::Native,
            AssetBinding::new(AssetId::Native, native_feed, native_source, NATIVE_DECIMALS),
        );
        Self { bindings }
    }

    /// Bind a new asset.
    pub fn register(&mut self, binding: AssetBinding) -> Result<()> {
        if self.bindings.contains_key(&binding.asset) {
            return Err(BankError::AssetAlreadySupported(binding.asset));
        }

        if binding.decimals > MAX_ASSET_DECIMALS {
            return Err(BankError::UnsupportedPrecision {
                asset: binding.asset,
                decimals: binding.decimals,
            });
        }

        info!(
            asset = %binding.asset,
            feed = %binding.feed,
            decimals = binding.decimals,
            "Asset bound"
        );
        self.bindings.insert(binding.asset.clone(), binding);
        Ok(())
    }

    /// Remove an asset's binding. The caller checks that the asset holds
    /// no value.
    pub fn deregister(&mut self, asset: &AssetId) -> Result<AssetBinding> {
        if asset.is_native() {
            return Err(BankError::ConfigurationError(
                "the native asset binding is permanent".to_string(),
            ));
        }

        let binding = self
            .bindings
            .remove(asset)
            .ok_or_else(|| BankError::AssetNotSupported(asset.clone()))?;

        info!(asset = %asset, feed = %binding.feed, "Asset unbound");
        Ok(binding)
    }

    /// Get the binding for an asset.
    pub fn get(&self, asset: &AssetId) -> Result<&AssetBinding> {
        self.bindings
            .get(asset)
            .ok_or_else(|| BankError::AssetNotSupported(asset.clone()))
    }

    /// Check if an asset is supported.
    pub fn contains(&self, asset: &AssetId) -> bool {
        self.bindings.contains_key(asset)
    }

    /// All bindings, in deterministic order.
    pub fn bindings(&self) -> impl Iterator<Item = &AssetBinding> {
        self.bindings.values()
    }

    /// All supported assets, in deterministic order.
    pub fn assets(&self) -> Vec<AssetId> {
        self.bindings.keys().cloned().collect()
    }

    /// Number of supported assets, native included.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Always false: the native asset is permanently bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockPriceSource;

    fn setup_registry() -> (AssetRegistry, Arc<MockPriceSource>) {
        let source = Arc::new(MockPriceSource::new("test"));
        let registry = AssetRegistry::new(FeedId::new("ETH/USD"), source.clone());
        (registry, source)
    }

    #[test]
    fn test_native_bound_from_construction() {
        let (registry, _) = setup_registry();

        let native = registry.get(&AssetId::Native).unwrap();
        assert_eq!(native.decimals, NATIVE_DECIMALS);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_and_collide() {
        let (mut registry, source) = setup_registry();
        let usdc = AssetId::token("usdc");

        registry
            .register(AssetBinding::new(usdc.clone(), "USDC/USD".into(), source.clone(), 6))
            .unwrap();
        assert!(registry.contains(&usdc));

        let result =
            registry.register(AssetBinding::new(usdc.clone(), "USDC/USD".into(), source, 6));
        assert_eq!(result, Err(BankError::AssetAlreadySupported(usdc)));
    }

    #[test]
    fn test_register_rejects_native_and_wide_precision() {
        let (mut registry, source) = setup_registry();

        let native = registry.register(AssetBinding::new(
            AssetId::Native,
            "OTHER".into(),
            source.clone(),
            18,
        ));
        assert_eq!(native, Err(BankError::AssetAlreadySupported(AssetId::Native)));

        let wide = registry.register(AssetBinding::new(
            AssetId::token("odd"),
            "ODD/USD".into(),
            source,
            37,
        ));
        assert!(matches!(wide, Err(BankError::UnsupportedPrecision { decimals: 37, .. })));
    }

    #[test]
    fn test_deregister() {
        let (mut registry, source) = setup_registry();
        let dai = AssetId::token("dai");
        registry
            .register(AssetBinding::new(dai.clone(), "DAI/USD".into(), source, 18))
            .unwrap();

        let removed = registry.deregister(&dai).unwrap();
        assert_eq!(removed.feed, FeedId::new("DAI/USD"));
        assert!(!registry.contains(&dai));

        assert_eq!(
            registry.deregister(&dai).unwrap_err(),
            BankError::AssetNotSupported(dai)
        );
        assert!(registry.deregister(&AssetId::Native).is_err());
    }

    #[test]
    fn test_iteration_order_is_deterministic() {
        let (mut registry, source) = setup_registry();
        for code in ["WBTC", "DAI", "USDC"] {
            registry
                .register(AssetBinding::new(
                    AssetId::token(code),
                    FeedId::new(format!("{}/USD", code)),
                    source.clone(),
                    8,
                ))
                .unwrap();
        }

        assert_eq!(
            registry.assets(),
            vec![
                AssetId::Native,
                AssetId::token("DAI"),
                AssetId::token("USDC"),
                AssetId::token("WBTC"),
            ]
        );
    }
}

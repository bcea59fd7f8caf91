//! Price source trait and test implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodia_common::AssetId;
use serde::{Deserialize, Serialize};

use crate::error::ValuationResult;

/// A price reported by an external feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Price of one whole unit of the asset in the reference currency,
    /// with `decimals` fractional digits. Feeds may report garbage
    /// (zero or negative); the engine rejects it.
    pub price: i128,
    /// Fractional digits of `price`.
    pub decimals: u8,
    /// When the feed last updated. Informational only; staleness is
    /// the feed's own contract.
    pub updated_at: DateTime<Utc>,
}

impl PriceQuote {
    /// Create a quote stamped now.
    pub fn new(price: i128, decimals: u8) -> Self {
        Self {
            price,
            decimals,
            updated_at: Utc::now(),
        }
    }
}

/// Trait for external price feeds.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Get the latest price for an asset.
    async fn latest_price(&self, asset: &AssetId) -> ValuationResult<PriceQuote>;
}

/// Mock price source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockPriceSource {
    name: String,
    quotes: dashmap::DashMap<AssetId, PriceQuote>,
    queries: std::sync::atomic::AtomicU64,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockPriceSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quotes: dashmap::DashMap::new(),
            queries: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Set the price for an asset.
    pub fn set_price(&self, asset: AssetId, price: i128, decimals: u8) {
        self.quotes.insert(asset, PriceQuote::new(price, decimals));
    }

    /// Stop reporting a price for an asset.
    pub fn clear_price(&self, asset: &AssetId) {
        self.quotes.remove(asset);
    }

    /// Number of `latest_price` calls served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl PriceSource for MockPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_price(&self, asset: &AssetId) -> ValuationResult<PriceQuote> {
        self.queries
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.quotes
            .get(asset)
            .map(|q| q.clone())
            .ok_or_else(|| crate::error::ValuationError::PriceUnavailable(asset.clone()))
    }
}

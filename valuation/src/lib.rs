//! Custodia Valuation Engine
//!
//! Prices native amounts of supported assets in the reference currency.
//!
//! # Features
//!
//! - Pluggable price sources behind the [`PriceSource`] trait
//! - A deterministic registry of asset / feed bindings
//! - Overflow-safe 256-bit valuation arithmetic with truncating division
//! - No caching: every valuation reads the feed again
//!
//! # Example
//!
//! ```rust,ignore
//! use custodia_valuation::{AssetRegistry, ValuationEngine};
//! use custodia_common::AssetId;
//!
//! let registry = AssetRegistry::new("ETH/USD".into(), eth_feed);
//! let engine = ValuationEngine::new();
//!
//! let binding = registry.get(&AssetId::Native)?;
//! let valuation = engine.value_of(binding, 1_000_000_000_000_000_000).await?;
//! ```

pub mod engine;
pub mod provider;
pub mod registry;
pub mod valuation;
pub mod error;

pub use engine::{reference_value, ValuationEngine, ValuationStats};
pub use provider::{PriceQuote, PriceSource};
pub use registry::{AssetBinding, AssetRegistry};
pub use valuation::Valuation;
pub use error::{ValuationError, ValuationResult};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockPriceSource;

//! Bank configuration.

use custodia_common::{format_units, parse_units, FeedId, Result, UserId, REFERENCE_DECIMALS};

/// One reference unit (`10^18`).
const ONE: u128 = 1_000_000_000_000_000_000;

/// Construction-time bank configuration.
///
/// The two limits are raw reference units. They are copied into the bank at
/// construction and cannot change afterwards.
#[derive(Debug, Clone)]
pub struct BankConfig {
    /// Maximum total value held across all assets.
    pub bank_cap: u128,
    /// Maximum value of a single withdrawal.
    pub withdrawal_threshold: u128,
    /// Caller allowed to manage the asset registry.
    pub admin: UserId,
    /// Feed pricing the native asset.
    pub native_feed: FeedId,
    /// Capacity of the record broadcast channel.
    pub event_buffer: usize,
    /// Log level.
    pub log_level: String,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            bank_cap: 50_000 * ONE,
            withdrawal_threshold: 5_000 * ONE,
            admin: UserId::new("admin"),
            native_feed: FeedId::new("ETH/USD"),
            event_buffer: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl BankConfig {
    /// Load configuration from environment variables.
    ///
    /// Limits are human decimal strings in the reference currency
    /// (`CUSTODIA_BANK_CAP=50000`, `CUSTODIA_WITHDRAWAL_THRESHOLD=1250.5`).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(cap) = std::env::var("CUSTODIA_BANK_CAP") {
            config.bank_cap = parse_units(&cap, REFERENCE_DECIMALS)?;
        }

        if let Ok(threshold) = std::env::var("CUSTODIA_WITHDRAWAL_THRESHOLD") {
            config.withdrawal_threshold = parse_units(&threshold, REFERENCE_DECIMALS)?;
        }

        if let Ok(admin) = std::env::var("CUSTODIA_ADMIN") {
            config.admin = UserId::new(admin);
        }

        if let Ok(feed) = std::env::var("CUSTODIA_NATIVE_FEED") {
            config.native_feed = FeedId::new(feed);
        }

        if let Ok(buffer) = std::env::var("CUSTODIA_EVENT_BUFFER") {
            if let Ok(buffer) = buffer.parse() {
                config.event_buffer = buffer;
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.bank_cap == 0 {
            return Err("Bank cap cannot be 0".to_string());
        }

        if self.withdrawal_threshold == 0 {
            return Err("Withdrawal threshold cannot be 0".to_string());
        }

        if self.withdrawal_threshold > self.bank_cap {
            return Err(format!(
                "Withdrawal threshold {} cannot exceed bank cap {}",
                format_units(self.withdrawal_threshold, REFERENCE_DECIMALS),
                format_units(self.bank_cap, REFERENCE_DECIMALS),
            ));
        }

        if !self.admin.is_valid() {
            return Err("Admin cannot be empty".to_string());
        }

        if self.native_feed.as_str().is_empty() {
            return Err("Native feed cannot be empty".to_string());
        }

        if self.event_buffer == 0 {
            return Err("Event buffer cannot be 0".to_string());
        }

        Ok(())
    }
}

//! Error types for Custodia operations.

use crate::{AssetId, UserId};
use thiserror::Error;

/// Main error type for Custodia operations.
///
/// Every variant is terminal for the operation that raised it. Nothing is
/// retried internally and no partial ledger mutation survives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    /// The amount argument is zero (or truncates to zero at ledger precision).
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    /// The asset has no price-source binding.
    #[error("Asset not supported: {0}")]
    AssetNotSupported(AssetId),

    /// The asset is already registered.
    #[error("Asset already supported: {0}")]
    AssetAlreadySupported(AssetId),

    /// The price source returned a non-positive price or no data.
    #[error("Invalid price data for {asset}: {reason}")]
    InvalidPriceData { asset: AssetId, reason: String },

    /// Debit exceeds the stored balance.
    #[error("Insufficient balance of {asset} for {user}: requested {requested}, available {available}")]
    InsufficientBalance {
        user: UserId,
        asset: AssetId,
        requested: u128,
        available: u128,
    },

    /// The deposit would push the global valuation past the capacity.
    #[error("Bank cap exceeded: requested {requested}, available {available}")]
    BankCapExceeded { requested: u128, available: u128 },

    /// The withdrawal is worth more than the per-withdrawal ceiling.
    #[error("Withdrawal threshold exceeded: requested {requested}, threshold {threshold}")]
    WithdrawalThresholdExceeded { requested: u128, threshold: u128 },

    /// Moving the asset into or out of custody failed.
    #[error("Transfer of {asset} failed: {reason}")]
    TransferFailed { asset: AssetId, reason: String },

    /// An intermediate value left the representable range.
    #[error("Amount overflow")]
    AmountOverflow,

    /// Deregistration requested while the asset still holds value.
    #[error("Asset {asset} still holds a total of {total}")]
    AssetHasBalance { asset: AssetId, total: u128 },

    /// The caller is not allowed to manage the asset registry.
    #[error("Unauthorized caller: {0}")]
    Unauthorized(UserId),

    /// A mutating call arrived while another operation was still running.
    #[error("Another operation is in progress")]
    OperationInProgress,

    /// The declared precision is not supported.
    #[error("Unsupported precision {decimals} for {asset}")]
    UnsupportedPrecision { asset: AssetId, decimals: u8 },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl BankError {
    /// Get error code for records and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            BankError::ZeroAmount => "ZERO_AMOUNT",
            BankError::AssetNotSupported(_) => "ASSET_NOT_SUPPORTED",
            BankError::AssetAlreadySupported(_) => "ASSET_ALREADY_SUPPORTED",
            BankError::InvalidPriceData { .. } => "INVALID_PRICE_DATA",
            BankError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BankError::BankCapExceeded { .. } => "BANK_CAP_EXCEEDED",
            BankError::WithdrawalThresholdExceeded { .. } => "WITHDRAWAL_THRESHOLD_EXCEEDED",
            BankError::TransferFailed { .. } => "TRANSFER_FAILED",
            BankError::AmountOverflow => "AMOUNT_OVERFLOW",
            BankError::AssetHasBalance { .. } => "ASSET_HAS_BALANCE",
            BankError::Unauthorized(_) => "UNAUTHORIZED",
            BankError::OperationInProgress => "OPERATION_IN_PROGRESS",
            BankError::UnsupportedPrecision { .. } => "UNSUPPORTED_PRECISION",
            BankError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Check if the error came from a limit rather than from the request.
    pub fn is_limit_breach(&self) -> bool {
        matches!(
            self,
            BankError::BankCapExceeded { .. } | BankError::WithdrawalThresholdExceeded { .. }
        )
    }
}

/// Result type alias for Custodia operations.
pub type Result<T> = std::result::Result<T, BankError>;

//! Custodia Common Types
//!
//! Shared types used across the Custodia workspace: identifiers, fixed
//! precisions, decimal normalization, the unified error type and the
//! observable records the bank emits.

pub mod identifiers;
pub mod amount;
pub mod scale;
pub mod error;
pub mod records;

pub use identifiers::*;
pub use amount::*;
pub use error::*;
pub use records::*;

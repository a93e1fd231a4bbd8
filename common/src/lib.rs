//! Interstellar Common Types
//!
//! Shared types used across the wallet ledger and the FX rate cache,
//! including identifiers, currency codes, amounts and error kinds.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;

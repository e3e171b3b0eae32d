//! Shared domain rules for the Farm Feed Management Platform
//!
//! This crate contains the pure parts of the system: the stock ledger
//! derivation rules, domain validation, and common types. No I/O lives here,
//! which keeps the arithmetic testable in isolation from storage.

pub mod ledger;
pub mod types;
pub mod validation;

pub use ledger::*;
pub use types::*;
pub use validation::*;

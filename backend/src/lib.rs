//! Farm Feed Management Platform - Ledger Engine
//!
//! Tracks, per farm and raw material, a running physical and financial
//! warehouse ledger: quantities received through purchases, quantities
//! consumed by feed production runs, operator-corrected physical counts,
//! shrinkage, the rolling warehouse price and total stock value. The
//! orchestration services keep the ledger consistent across purchases,
//! production, soft-deletion and manual corrections.

pub mod config;
pub mod error;
pub mod services;

pub use config::Config;

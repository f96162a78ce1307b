//! Core modules for the USDD engine.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and protocol parameters
//! - Trove records
//! - Redistribution rewards and stake correction
//! - Decaying base-rate fees
//! - Collateral and debt pools
//! - Token ledgers

pub mod config;
pub mod fees;
pub mod pools;
pub mod rewards;
pub mod token;
pub mod trove;

pub use config::*;
pub use fees::*;
pub use pools::*;
pub use rewards::*;
pub use token::*;
pub use trove::*;

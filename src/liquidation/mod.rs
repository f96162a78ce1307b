//! Liquidation module for the USDD engine.
//!
//! This module handles liquidations and the stability pool:
//! - Liquidation values: gas compensation, offset, redistribution, surplus
//! - Stability pool for absorbing liquidated debt
//! - Recovery Mode gating of every trove mutation
//! - Ordered trove index used to walk liquidation and redemption candidates

pub mod engine;
pub mod recovery;
pub mod sorted_troves;
pub mod stability_pool;

pub use engine::*;
pub use recovery::*;
pub use sorted_troves::*;
pub use stability_pool::*;

//! Utility modules for the USDD engine.
//!
//! This module contains shared utilities used across the crate:
//! - Fixed-point arithmetic
//! - Addresses and hashing
//! - Constants
//! - Tracing setup

pub mod constants;
pub mod crypto;
pub mod math;
pub mod telemetry;

pub use constants::*;
pub use crypto::*;
pub use math::*;
pub use telemetry::*;

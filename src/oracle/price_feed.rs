//! Price feed implementation.
//!
//! The engine reads the collateral price through [`PriceOracle`] once per
//! operation. [`FixedPriceFeed`] is a settable feed for tests and
//! simulations that remembers the previous price for change detection.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::math::format_wad;

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE ORACLE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of the current collateral price (18 decimals, USD per collateral unit)
pub trait PriceOracle {
    /// Current price
    fn current_price(&self) -> U256;
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED PRICE FEED
// ═══════════════════════════════════════════════════════════════════════════════

/// A price feed whose value is set by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPriceFeed {
    /// Current price
    current: U256,
    /// Price before the last update
    previous: U256,
    /// Number of updates applied
    updates: u64,
}

impl FixedPriceFeed {
    /// Create a feed at `price`
    pub fn new(price: U256) -> Self {
        Self {
            current: price,
            previous: price,
            updates: 0,
        }
    }

    /// Replace the price. A zero price is rejected.
    pub fn set_price(&mut self, price: U256) -> Result<()> {
        if price.is_zero() {
            return Err(Error::InvalidParameter {
                name: "price".into(),
                reason: "must be positive".into(),
            });
        }
        self.previous = self.current;
        self.current = price;
        self.updates += 1;
        tracing::debug!(price = %format_wad(price), "price updated");
        Ok(())
    }

    /// Price before the last update
    pub fn previous_price(&self) -> U256 {
        self.previous
    }

    /// Number of updates applied
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// Change since the previous price in basis points, and whether it was a drop
    pub fn change_bps(&self) -> (U256, bool) {
        if self.previous.is_zero() {
            return (U256::zero(), false);
        }
        let (diff, dropped) = if self.current < self.previous {
            (self.previous - self.current, true)
        } else {
            (self.current - self.previous, false)
        };
        (diff * U256::from(10_000u64) / self.previous, dropped)
    }
}

impl PriceOracle for FixedPriceFeed {
    fn current_price(&self) -> U256 {
        self.current
    }
}

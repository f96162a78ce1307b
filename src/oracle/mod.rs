//! Oracle module for price feeds.
//!
//! The engine consumes prices through the [`PriceOracle`] trait; fetching,
//! aggregation and staleness checks belong to the implementation behind it.

pub mod price_feed;

pub use price_feed::*;

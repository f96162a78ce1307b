//! # USDD
//!
//! Accounting engine for a collateralized-debt stablecoin: borrowers lock
//! collateral in Troves and mint USDD against it.
//!
//! ## Architecture
//!
//! - **Core**: Parameters, trove records, fees, reward accounting, pools, tokens
//! - **Oracle**: The price input the engine consumes
//! - **Liquidation**: Liquidation values, Recovery Mode rules, stability pool, position index
//! - **Protocol**: The [`TroveLedger`](protocol::TroveLedger) state machine
//!
//! Liquidated debt is absorbed by the stability pool first and redistributed
//! to the remaining troves pro rata to their stakes. Redistributed rewards
//! are realized lazily, the next time a trove is touched.
//!
//! ## Example
//!
//! ```rust,ignore
//! use usdd::prelude::*;
//!
//! let mut ledger = InMemoryTroveLedger::in_memory(ProtocolParams::default(), to_wad(2_000))?;
//! let alice = Address::from_label("alice");
//! ledger.token_mut().mint(alice, to_wad(10))?;
//!
//! ledger.open_trove(OpenTroveParams::new(alice, to_wad(2), to_wad(2_000)))?;
//! println!("ICR: {}", format_wad(ledger.get_current_icr(&alice)?));
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod error;
pub mod liquidation;
pub mod oracle;
pub mod protocol;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::{ProtocolAddresses, ProtocolParams},
        fees::FeeState,
        rewards::{EntireDebtAndColl, PendingRewards},
        token::{InMemoryTokenLedger, TokenLedger},
        trove::{Trove, TroveStatus},
    };
    pub use crate::error::{Error, Result};
    pub use crate::liquidation::{
        sorted_troves::{PositionIndex, SortedTroves},
        stability_pool::StabilityPool,
    };
    pub use crate::oracle::price_feed::{FixedPriceFeed, PriceOracle};
    pub use crate::protocol::{
        events::{EventLog, ProtocolEvent, TroveOperation},
        operations::{
            AdjustTroveParams, Hints, OpenTroveParams, OperationResult, ProtocolOperation,
            RedeemParams,
        },
        state::SystemState,
        trove_ledger::{InMemoryTroveLedger, TroveLedger},
    };
    pub use crate::utils::{
        crypto::{Address, Hash},
        math::{dec, format_wad, parse_wad, to_wad},
    };
    pub use primitive_types::U256;
}

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const PROTOCOL_NAME: &str = "USDD";

//! Protocol module - the trove ledger and its operations.
//!
//! This module ties the accounting pieces together:
//! - [`SystemState`]: every trove record and global aggregate
//! - [`TroveLedger`]: atomic open, adjust, close, liquidate and redeem
//! - Operation parameters, outcomes and the event log

pub mod events;
pub mod operations;
pub mod state;
pub mod trove_ledger;

pub use events::*;
pub use operations::*;
pub use state::*;
pub use trove_ledger::*;

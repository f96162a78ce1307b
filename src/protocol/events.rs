//! Protocol events for state change notifications.
//!
//! Every committed operation appends its events to a bounded [`EventLog`].
//! Rejected operations emit nothing.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::utils::constants::DEFAULT_MAX_EVENTS;
use crate::utils::crypto::{Address, Hash};

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Operation that touched a trove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TroveOperation {
    /// Opened by its owner
    OpenTrove,
    /// Adjusted by its owner
    AdjustTrove,
    /// Closed by its owner
    CloseTrove,
    /// Liquidated with TCR ≥ CCR
    LiquidateInNormalMode,
    /// Liquidated with TCR < CCR
    LiquidateInRecoveryMode,
    /// Redeemed against
    RedeemCollateral,
    /// Pending rewards realized
    ApplyPendingRewards,
}

/// All protocol event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    /// A trove's recorded values changed
    TroveUpdated {
        /// Owner
        borrower: Address,
        /// New debt
        debt: U256,
        /// New collateral
        coll: U256,
        /// New stake
        stake: U256,
        /// Cause
        operation: TroveOperation,
    },
    /// A trove was liquidated
    TroveLiquidated {
        /// Owner
        borrower: Address,
        /// Debt liquidated (pending included)
        debt: U256,
        /// Collateral liquidated (pending included)
        coll: U256,
        /// Mode
        operation: TroveOperation,
    },
    /// Totals of one liquidation call
    Liquidation {
        /// Debt liquidated
        liquidated_debt: U256,
        /// Collateral liquidated
        liquidated_coll: U256,
        /// Collateral paid to the liquidator
        coll_gas_compensation: U256,
        /// USDD paid to the liquidator
        debt_gas_compensation: U256,
    },
    /// Totals of one redemption call
    Redemption {
        /// USDD the redeemer asked to redeem
        attempted_amount: U256,
        /// USDD actually redeemed
        actual_amount: U256,
        /// Collateral sent to the redeemer
        coll_sent: U256,
        /// Collateral kept as fee
        coll_fee: U256,
    },
    /// A borrowing fee was charged
    BorrowingFeePaid {
        /// Borrower
        borrower: Address,
        /// Fee in USDD
        fee: U256,
    },
    /// The base rate changed
    BaseRateUpdated {
        /// New base rate
        base_rate: U256,
    },
    /// The decay clock moved
    LastFeeOpTimeUpdated {
        /// New clock value
        timestamp: u64,
    },
    /// Sum of stakes changed
    TotalStakesUpdated {
        /// New total
        total_stakes: U256,
    },
    /// Stake-correction snapshots refreshed after a liquidation
    SystemSnapshotsUpdated {
        /// Total stakes snapshot
        total_stakes_snapshot: U256,
        /// Total collateral snapshot
        total_collateral_snapshot: U256,
    },
    /// Redistribution accumulators moved
    LTermsUpdated {
        /// New `L_Coll`
        l_coll: U256,
        /// New `L_Debt`
        l_debt: U256,
    },
    /// A stability pool deposit changed
    StabilityPoolDepositChanged {
        /// Depositor
        depositor: Address,
        /// New deposit
        new_deposit: U256,
        /// Collateral gain paid out
        coll_gain: U256,
    },
    /// Surplus collateral was claimed
    CollateralClaimed {
        /// Borrower
        borrower: Address,
        /// Amount claimed
        amount: U256,
    },
}

impl ProtocolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TroveUpdated { .. } => "TroveUpdated",
            Self::TroveLiquidated { .. } => "TroveLiquidated",
            Self::Liquidation { .. } => "Liquidation",
            Self::Redemption { .. } => "Redemption",
            Self::BorrowingFeePaid { .. } => "BorrowingFeePaid",
            Self::BaseRateUpdated { .. } => "BaseRateUpdated",
            Self::LastFeeOpTimeUpdated { .. } => "LastFeeOpTimeUpdated",
            Self::TotalStakesUpdated { .. } => "TotalStakesUpdated",
            Self::SystemSnapshotsUpdated { .. } => "SystemSnapshotsUpdated",
            Self::LTermsUpdated { .. } => "LTermsUpdated",
            Self::StabilityPoolDepositChanged { .. } => "StabilityPoolDepositChanged",
            Self::CollateralClaimed { .. } => "CollateralClaimed",
        }
    }

    /// Compute event hash
    pub fn hash(&self) -> Hash {
        let data = bincode::serialize(self).unwrap_or_default();
        Hash::sha256(&data)
    }
}

/// An event with the ledger time it was emitted at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Ledger timestamp (seconds)
    pub timestamp: u64,
    /// The event
    pub event: ProtocolEvent,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded log of recent events, oldest pruned first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<EventRecord>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    /// Create a log keeping at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add an event to the log
    pub fn push(&mut self, timestamp: u64, event: ProtocolEvent) {
        self.events.push(EventRecord { timestamp, event });
        if self.events.len() > self.capacity {
            let excess = self.events.len() - self.capacity;
            self.events.drain(0..excess);
        }
    }

    /// Add several events with the same timestamp
    pub fn extend(&mut self, timestamp: u64, events: impl IntoIterator<Item = ProtocolEvent>) {
        for event in events {
            self.push(timestamp, event);
        }
    }

    /// Get all events
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Most recent event
    pub fn latest(&self) -> Option<&EventRecord> {
        self.events.last()
    }

    /// Get events of a specific type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&ProtocolEvent> {
        self.events
            .iter()
            .map(|r| &r.event)
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get the number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Hash chaining every event in order
    pub fn digest(&self) -> Hash {
        self.events.iter().fold(Hash::zero(), |acc, record| {
            let mut data = acc.as_bytes().to_vec();
            data.extend_from_slice(&record.timestamp.to_be_bytes());
            data.extend_from_slice(record.event.hash().as_bytes());
            Hash::sha256(&data)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::math::to_wad;

    fn updated(label: &str) -> ProtocolEvent {
        ProtocolEvent::TroveUpdated {
            borrower: Address::from_label(label),
            debt: to_wad(100),
            coll: to_wad(2),
            stake: to_wad(2),
            operation: TroveOperation::OpenTrove,
        }
    }

    #[test]
    fn test_event_types() {
        assert_eq!(updated("a").event_type(), "TroveUpdated");
        let event = ProtocolEvent::BaseRateUpdated { base_rate: U256::zero() };
        assert_eq!(event.event_type(), "BaseRateUpdated");
    }

    #[test]
    fn test_event_log() {
        let mut log = EventLog::new();
        assert!(log.is_empty());

        log.push(1, updated("a"));
        log.extend(2, [
            ProtocolEvent::TotalStakesUpdated { total_stakes: to_wad(2) },
            updated("b"),
        ]);

        assert_eq!(log.len(), 3);
        assert_eq!(log.filter_by_type("TroveUpdated").len(), 2);
        assert_eq!(log.latest().map(|r| r.timestamp), Some(2));
    }

    #[test]
    fn test_event_log_bounded() {
        let mut log = EventLog::with_capacity(2);
        for t in 0..5 {
            log.push(t, updated("a"));
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[0].timestamp, 3);
    }

    #[test]
    fn test_event_hash_and_digest() {
        let event = updated("a");
        assert_eq!(event.hash(), event.hash());
        assert_ne!(event.hash(), updated("b").hash());

        let mut log = EventLog::new();
        let empty = log.digest();
        assert!(empty.is_zero());
        log.push(1, event);
        assert_ne!(log.digest(), empty);
    }
}

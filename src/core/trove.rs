//! Trove records.
//!
//! A trove is one borrower's collateralized debt position. The record holds
//! the *recorded* collateral and debt; rewards redistributed since the last
//! touch are pending until realized (see [`crate::core::rewards`]).

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::crypto::Address;
use crate::utils::math::{compute_cr, compute_nominal_cr, sub};

// ═══════════════════════════════════════════════════════════════════════════════
// TROVE STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a trove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TroveStatus {
    /// Never opened
    #[default]
    NonExistent,
    /// Open
    Active,
    /// Repaid and closed by its owner
    ClosedByOwner,
    /// Closed by a liquidation
    ClosedByLiquidation,
    /// Closed because a redemption consumed all of its net debt
    ClosedByRedemption,
}

impl TroveStatus {
    /// Check if trove is open
    pub fn is_active(&self) -> bool {
        matches!(self, TroveStatus::Active)
    }

    /// Check if trove was closed by any path
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TroveStatus::ClosedByOwner
                | TroveStatus::ClosedByLiquidation
                | TroveStatus::ClosedByRedemption
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWARD SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Global reward accumulators as of a trove's last touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RewardSnapshot {
    /// `L_Coll` at last touch
    pub l_coll: U256,
    /// `L_Debt` at last touch
    pub l_debt: U256,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TROVE
// ═══════════════════════════════════════════════════════════════════════════════

/// A borrower's position
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trove {
    /// Owner (one trove per address)
    pub owner: Address,
    /// Recorded collateral (18 decimals)
    pub coll: U256,
    /// Recorded debt including gas compensation (18 decimals)
    pub debt: U256,
    /// Snapshot-corrected share used for redistribution
    pub stake: U256,
    /// Current status
    pub status: TroveStatus,
    /// Accumulators at last touch
    pub snapshot: RewardSnapshot,
}

impl Trove {
    /// An empty record for `owner`
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            ..Self::default()
        }
    }

    /// Check if trove is open
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Recorded collateral ratio at `price` (pending rewards excluded)
    pub fn icr(&self, price: U256) -> Result<U256> {
        compute_cr(self.coll, self.debt, price)
    }

    /// Recorded nominal ratio, the ordering key
    pub fn nicr(&self) -> Result<U256> {
        compute_nominal_cr(self.coll, self.debt)
    }

    /// Debt excluding the gas compensation reserve
    pub fn net_debt(&self, gas_compensation: U256) -> Result<U256> {
        sub(self.debt, gas_compensation)
    }

    /// Zero every field and mark closed
    pub fn close(&mut self, status: TroveStatus) {
        self.coll = U256::zero();
        self.debt = U256::zero();
        self.stake = U256::zero();
        self.snapshot = RewardSnapshot::default();
        self.status = status;
    }
}

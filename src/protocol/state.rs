//! System state owned by the ledger.
//!
//! Every trove record and every global aggregate lives in one
//! [`SystemState`] value. Operations run against a working copy and the
//! ledger swaps it in only when the whole operation has succeeded, so a
//! rejected call leaves the committed state byte-for-byte unchanged.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::config::ProtocolParams;
use crate::core::fees::FeeState;
use crate::core::pools::Pools;
use crate::core::rewards::{EntireDebtAndColl, PendingRewards, RewardState};
use crate::core::trove::{Trove, TroveStatus};
use crate::error::{Error, Result};
use crate::liquidation::recovery::RecoveryModeStatus;
use crate::liquidation::stability_pool::StabilityPool;
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::{add, compute_cr, compute_nominal_cr, sub};

// ═══════════════════════════════════════════════════════════════════════════════
// SYSTEM STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Trove records plus the global aggregates
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemState {
    /// Trove records by owner (closed records are kept, zeroed)
    pub troves: BTreeMap<Address, Trove>,
    /// Number of active troves
    pub trove_owners_count: u64,
    /// Redistribution accumulators and stake totals
    pub rewards: RewardState,
    /// Base rate and decay clock
    pub fees: FeeState,
    /// Active, default and surplus pools
    pub pools: Pools,
    /// Stability pool
    pub stability_pool: StabilityPool,
    /// Ledger clock (seconds)
    pub timestamp: u64,
}

impl SystemState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TROVE ACCESS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Trove record of `borrower`, if one was ever opened
    pub fn trove(&self, borrower: &Address) -> Option<&Trove> {
        self.troves.get(borrower)
    }

    /// Status of `borrower`'s trove
    pub fn status(&self, borrower: &Address) -> TroveStatus {
        self.trove(borrower).map(|t| t.status).unwrap_or_default()
    }

    /// Active trove of `borrower`
    pub fn active_trove(&self, borrower: &Address) -> Result<&Trove> {
        self.troves
            .get(borrower)
            .filter(|t| t.is_active())
            .ok_or(Error::PositionNotFound(*borrower))
    }

    fn active_trove_mut(&mut self, borrower: &Address) -> Result<&mut Trove> {
        self.troves
            .get_mut(borrower)
            .filter(|t| t.is_active())
            .ok_or(Error::PositionNotFound(*borrower))
    }

    /// Recorded values plus pending rewards
    pub fn entire_debt_and_coll(&self, borrower: &Address) -> Result<EntireDebtAndColl> {
        let trove = self.active_trove(borrower)?;
        self.rewards.entire_debt_and_coll(trove)
    }

    /// ICR including pending rewards
    pub fn current_icr(&self, borrower: &Address, price: U256) -> Result<U256> {
        let entire = self.entire_debt_and_coll(borrower)?;
        compute_cr(entire.coll, entire.debt, price)
    }

    /// Nominal ratio including pending rewards
    pub fn nominal_icr(&self, borrower: &Address) -> Result<U256> {
        let entire = self.entire_debt_and_coll(borrower)?;
        compute_nominal_cr(entire.coll, entire.debt)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SYSTEM RATIOS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Active plus default collateral
    pub fn entire_system_coll(&self) -> Result<U256> {
        self.pools.entire_system_coll()
    }

    /// Active plus default debt
    pub fn entire_system_debt(&self) -> Result<U256> {
        self.pools.entire_system_debt()
    }

    /// Total collateralization ratio at `price`
    pub fn tcr(&self, price: U256) -> Result<U256> {
        compute_cr(self.entire_system_coll()?, self.entire_system_debt()?, price)
    }

    /// System collateralization and mode at `price`
    pub fn recovery_status(&self, price: U256, params: &ProtocolParams) -> Result<RecoveryModeStatus> {
        RecoveryModeStatus::evaluate(
            self.entire_system_coll()?,
            self.entire_system_debt()?,
            price,
            params,
        )
    }

    /// Whether TCR < CCR at `price`
    pub fn is_recovery_mode(&self, price: U256, params: &ProtocolParams) -> Result<bool> {
        Ok(self.recovery_status(price, params)?.is_active)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REWARDS AND STAKES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fold pending rewards into `borrower`'s trove and move them from the default to the active pool
    pub fn apply_pending_rewards(&mut self, borrower: &Address) -> Result<PendingRewards> {
        let trove = self.active_trove(borrower)?;
        if !self.rewards.has_pending_rewards(trove) {
            return Ok(PendingRewards::default());
        }

        let pending = self.rewards.pending_rewards(trove)?;
        let coll = add(trove.coll, pending.coll)?;
        let debt = add(trove.debt, pending.debt)?;
        let (active, default) = self.pools.with_pending_moved(pending.coll, pending.debt)?;
        let snapshot = self.rewards.current_snapshot();

        let trove = self.active_trove_mut(borrower)?;
        trove.coll = coll;
        trove.debt = debt;
        trove.snapshot = snapshot;
        self.pools.active = active;
        self.pools.default = default;
        Ok(pending)
    }

    /// Move a liquidated trove's pending rewards from the default to the active pool
    pub fn move_pending_to_active(&mut self, pending: &PendingRewards) -> Result<()> {
        let (active, default) = self.pools.with_pending_moved(pending.coll, pending.debt)?;
        self.pools.active = active;
        self.pools.default = default;
        Ok(())
    }

    /// Snapshot the current accumulators into `borrower`'s trove
    pub fn update_reward_snapshot(&mut self, borrower: &Address) -> Result<()> {
        let snapshot = self.rewards.current_snapshot();
        self.active_trove_mut(borrower)?.snapshot = snapshot;
        Ok(())
    }

    /// Recompute `borrower`'s stake from its collateral and update the total
    pub fn update_stake_and_total_stakes(&mut self, borrower: &Address) -> Result<U256> {
        let trove = self.active_trove(borrower)?;
        let new_stake = self.rewards.compute_new_stake(trove.coll)?;
        let total = self.rewards.total_stakes_after(trove.stake, new_stake)?;

        self.active_trove_mut(borrower)?.stake = new_stake;
        self.rewards.total_stakes = total;
        Ok(new_stake)
    }

    /// Take `borrower`'s stake out of the total
    pub fn remove_stake(&mut self, borrower: &Address) -> Result<()> {
        let trove = self.active_trove(borrower)?;
        let total = sub(self.rewards.total_stakes, trove.stake)?;
        self.active_trove_mut(borrower)?.stake = U256::zero();
        self.rewards.total_stakes = total;
        Ok(())
    }

    /// Spread `coll`/`debt` over all stakes and move them from the active to the default pool
    pub fn redistribute_debt_and_coll(&mut self, coll: U256, debt: U256) -> Result<()> {
        if debt.is_zero() {
            return Ok(());
        }
        let rewards = self.rewards.redistributed(coll, debt)?;
        let active = self.pools.active.decreased(coll, debt)?;
        let default = self.pools.default.increased(coll, debt)?;
        self.rewards = rewards;
        self.pools.active = active;
        self.pools.default = default;
        Ok(())
    }

    /// Refresh the stake-correction snapshots, excluding collateral still owed to the liquidator
    pub fn update_system_snapshots(&mut self, coll_remainder: U256) -> Result<()> {
        let system_coll = add(sub(self.pools.active.coll, coll_remainder)?, self.pools.default.coll)?;
        self.rewards = self.rewards.with_system_snapshots(system_coll);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a newly opened trove
    pub fn insert_active_trove(&mut self, borrower: Address, coll: U256, debt: U256) -> Result<()> {
        if self.status(&borrower).is_active() {
            return Err(Error::PositionAlreadyActive(borrower));
        }
        let trove = Trove {
            owner: borrower,
            coll,
            debt,
            stake: U256::zero(),
            status: TroveStatus::Active,
            snapshot: self.rewards.current_snapshot(),
        };
        self.troves.insert(borrower, trove);
        self.trove_owners_count += 1;
        Ok(())
    }

    /// Overwrite the recorded collateral and debt of an active trove
    pub fn update_trove_amounts(&mut self, borrower: &Address, coll: U256, debt: U256) -> Result<()> {
        let trove = self.active_trove_mut(borrower)?;
        trove.coll = coll;
        trove.debt = debt;
        Ok(())
    }

    /// Zero `borrower`'s trove and mark it closed. The last active trove cannot be closed.
    pub fn close_trove(&mut self, borrower: &Address, status: TroveStatus) -> Result<()> {
        if !status.is_closed() {
            return Err(Error::Internal(format!("{:?} is not a closed status", status)));
        }
        self.active_trove(borrower)?;
        if self.trove_owners_count <= 1 {
            return Err(Error::LastPositionRestriction);
        }
        self.active_trove_mut(borrower)?.close(status);
        self.trove_owners_count -= 1;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INVARIANTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Check the bookkeeping invariants that hold after every operation
    pub fn verify_invariants(&self) -> Result<()> {
        let active: Vec<&Trove> = self.troves.values().filter(|t| t.is_active()).collect();

        if active.len() as u64 != self.trove_owners_count {
            return Err(Error::InvariantViolation(format!(
                "{} active troves but count is {}",
                active.len(),
                self.trove_owners_count
            )));
        }

        let stakes = active
            .iter()
            .try_fold(U256::zero(), |acc, t| add(acc, t.stake))?;
        if stakes != self.rewards.total_stakes {
            return Err(Error::InvariantViolation(format!(
                "sum of stakes {} differs from total stakes {}",
                stakes, self.rewards.total_stakes
            )));
        }

        if !self.pools.surplus.verify_invariant() {
            return Err(Error::InvariantViolation("surplus pool total mismatch".into()));
        }

        if self.fees.base_rate > crate::utils::constants::ONE_HUNDRED_PERCENT {
            return Err(Error::InvariantViolation("base rate above 100%".into()));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Compute state hash
    pub fn state_hash(&self) -> Result<Hash> {
        Ok(Hash::sha256(&self.to_bytes()?))
    }
}

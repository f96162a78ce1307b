//! Stake-weighted redistribution of liquidated collateral and debt.
//!
//! When a liquidation cannot be fully absorbed by the stability pool, the
//! remainder is spread over every active trove in proportion to its stake
//! without touching them: two global accumulators, `L_Coll` and `L_Debt`,
//! record the cumulative amount redistributed per unit of stake. A trove's
//! pending share is `stake * (L - snapshot) / 1e18`.
//!
//! Integer division truncates, so each redistribution carries its remainder
//! forward into the numerator of the next one.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::trove::{RewardSnapshot, Trove};
use crate::error::{Error, Result};
use crate::utils::constants::DECIMAL_PRECISION;
use crate::utils::math::{add, mul, mul_div, sub};

/// Rewards a trove has accrued since its last touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingRewards {
    /// Pending collateral
    pub coll: U256,
    /// Pending debt
    pub debt: U256,
}

impl PendingRewards {
    /// Check if nothing is pending
    pub fn is_zero(&self) -> bool {
        self.coll.is_zero() && self.debt.is_zero()
    }
}

/// A trove's recorded values plus its pending rewards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntireDebtAndColl {
    /// Recorded debt plus pending debt
    pub debt: U256,
    /// Recorded collateral plus pending collateral
    pub coll: U256,
    /// The pending part
    pub pending: PendingRewards,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWARD STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Global redistribution aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RewardState {
    /// Collateral redistributed per unit staked, cumulative
    pub l_coll: U256,
    /// Debt redistributed per unit staked, cumulative
    pub l_debt: U256,
    /// Truncation remainder of the last collateral redistribution
    pub last_coll_error: U256,
    /// Truncation remainder of the last debt redistribution
    pub last_debt_error: U256,
    /// Sum of the stakes of all active troves
    pub total_stakes: U256,
    /// `total_stakes` right after the latest liquidation
    pub total_stakes_snapshot: U256,
    /// System collateral right after the latest liquidation (gas compensation excluded)
    pub total_collateral_snapshot: U256,
}

impl RewardState {
    /// The accumulators to snapshot into a trove on touch
    pub fn current_snapshot(&self) -> RewardSnapshot {
        RewardSnapshot {
            l_coll: self.l_coll,
            l_debt: self.l_debt,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PENDING REWARDS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Collateral accrued by `trove` since its snapshot
    pub fn pending_coll(&self, trove: &Trove) -> Result<U256> {
        let per_unit = sub(self.l_coll, trove.snapshot.l_coll)?;
        if per_unit.is_zero() || !trove.is_active() {
            return Ok(U256::zero());
        }
        mul_div(trove.stake, per_unit, DECIMAL_PRECISION)
    }

    /// Debt accrued by `trove` since its snapshot
    pub fn pending_debt(&self, trove: &Trove) -> Result<U256> {
        let per_unit = sub(self.l_debt, trove.snapshot.l_debt)?;
        if per_unit.is_zero() || !trove.is_active() {
            return Ok(U256::zero());
        }
        mul_div(trove.stake, per_unit, DECIMAL_PRECISION)
    }

    /// Both pending amounts
    pub fn pending_rewards(&self, trove: &Trove) -> Result<PendingRewards> {
        Ok(PendingRewards {
            coll: self.pending_coll(trove)?,
            debt: self.pending_debt(trove)?,
        })
    }

    /// Whether `trove` has missed any redistribution
    pub fn has_pending_rewards(&self, trove: &Trove) -> bool {
        trove.is_active()
            && (trove.snapshot.l_coll < self.l_coll || trove.snapshot.l_debt < self.l_debt)
    }

    /// Recorded values plus pending rewards
    pub fn entire_debt_and_coll(&self, trove: &Trove) -> Result<EntireDebtAndColl> {
        let pending = self.pending_rewards(trove)?;
        Ok(EntireDebtAndColl {
            debt: add(trove.debt, pending.debt)?,
            coll: add(trove.coll, pending.coll)?,
            pending,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STAKES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Stake for `coll`: `coll * total_stakes_snapshot / total_collateral_snapshot`.
    ///
    /// Before the first liquidation the collateral snapshot is zero and the
    /// correction ratio is taken as 1.
    pub fn compute_new_stake(&self, coll: U256) -> Result<U256> {
        if self.total_collateral_snapshot.is_zero() {
            return Ok(coll);
        }
        if self.total_stakes_snapshot.is_zero() {
            return Err(Error::InvariantViolation(
                "stake snapshot is zero while collateral snapshot is not".into(),
            ));
        }
        mul_div(coll, self.total_stakes_snapshot, self.total_collateral_snapshot)
    }

    /// `total_stakes` after replacing `old_stake` with `new_stake`
    pub fn total_stakes_after(&self, old_stake: U256, new_stake: U256) -> Result<U256> {
        add(sub(self.total_stakes, old_stake)?, new_stake)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REDISTRIBUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// State after redistributing `coll` and `debt` over `total_stakes`.
    ///
    /// `total_stakes` must already exclude the liquidated troves.
    pub fn redistributed(&self, coll: U256, debt: U256) -> Result<RewardState> {
        if debt.is_zero() {
            return Ok(*self);
        }
        if self.total_stakes.is_zero() {
            return Err(Error::InvariantViolation(
                "redistribution with no remaining stakes".into(),
            ));
        }

        let coll_numerator = add(mul(coll, DECIMAL_PRECISION)?, self.last_coll_error)?;
        let debt_numerator = add(mul(debt, DECIMAL_PRECISION)?, self.last_debt_error)?;

        let coll_per_stake = coll_numerator / self.total_stakes;
        let debt_per_stake = debt_numerator / self.total_stakes;

        Ok(RewardState {
            l_coll: add(self.l_coll, coll_per_stake)?,
            l_debt: add(self.l_debt, debt_per_stake)?,
            last_coll_error: coll_numerator - coll_per_stake * self.total_stakes,
            last_debt_error: debt_numerator - debt_per_stake * self.total_stakes,
            ..*self
        })
    }

    /// State after a liquidation, with the stake-correction snapshots refreshed.
    ///
    /// `system_coll` is the collateral left in the active and default pools,
    /// excluding collateral still owed to liquidators as gas compensation.
    pub fn with_system_snapshots(&self, system_coll: U256) -> RewardState {
        RewardState {
            total_stakes_snapshot: self.total_stakes,
            total_collateral_snapshot: system_coll,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trove::TroveStatus;
    use crate::utils::crypto::Address;
    use crate::utils::math::{dec, to_wad};

    fn trove(label: &str, stake: U256, snapshot: RewardSnapshot) -> Trove {
        Trove {
            owner: Address::from_label(label),
            coll: stake,
            debt: to_wad(100),
            stake,
            status: TroveStatus::Active,
            snapshot,
        }
    }

    #[test]
    fn test_redistribution_splits_by_stake() {
        let state = RewardState {
            total_stakes: to_wad(20),
            ..Default::default()
        };
        let start = state.current_snapshot();
        let a = trove("a", to_wad(15), start);
        let b = trove("b", to_wad(5), start);

        let next = state.redistributed(to_wad(2), to_wad(40)).unwrap();
        assert_eq!(next.l_coll, to_wad(2) * DECIMAL_PRECISION / to_wad(20));

        let pa = next.pending_coll(&a).unwrap();
        let pb = next.pending_coll(&b).unwrap();
        assert_eq!(pa, dec(15, 17));
        assert_eq!(pb, dec(5, 17));
        assert_eq!(pa + pb, to_wad(2));

        assert_eq!(next.pending_debt(&a).unwrap(), to_wad(30));
        assert_eq!(next.pending_debt(&b).unwrap(), to_wad(10));
    }

    #[test]
    fn test_redistribution_carries_truncation_error() {
        let state = RewardState {
            total_stakes: U256::from(3u64),
            ..Default::default()
        };
        // 1 wei of collateral over 3 units of stake: 1e18 / 3 leaves remainder 1
        let next = state.redistributed(U256::one(), U256::one()).unwrap();
        assert_eq!(next.l_coll, U256::from(333_333_333_333_333_333u64));
        assert_eq!(next.last_coll_error, U256::one());

        let again = next.redistributed(U256::one(), U256::one()).unwrap();
        assert_eq!(again.l_coll, U256::from(666_666_666_666_666_666u64));
        assert_eq!(again.last_coll_error, U256::from(2u64));

        // Third wei: the carried remainders add up and nothing is lost
        let third = again.redistributed(U256::one(), U256::one()).unwrap();
        assert_eq!(third.l_coll, DECIMAL_PRECISION);
        assert_eq!(third.last_coll_error, U256::zero());
    }

    #[test]
    fn test_zero_debt_is_noop() {
        let state = RewardState {
            total_stakes: to_wad(1),
            ..Default::default()
        };
        assert_eq!(state.redistributed(to_wad(1), U256::zero()).unwrap(), state);
    }

    #[test]
    fn test_redistribution_without_stakes_fails() {
        let state = RewardState::default();
        assert!(matches!(
            state.redistributed(to_wad(1), to_wad(1)),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_pending_rewards_after_snapshot() {
        let state = RewardState {
            l_coll: to_wad(1),
            l_debt: to_wad(3),
            total_stakes: to_wad(10),
            ..Default::default()
        };
        let fresh = trove("c", to_wad(10), state.current_snapshot());
        assert!(!state.has_pending_rewards(&fresh));
        assert!(state.pending_rewards(&fresh).unwrap().is_zero());

        let stale = trove("d", to_wad(10), RewardSnapshot::default());
        assert!(state.has_pending_rewards(&stale));
        let entire = state.entire_debt_and_coll(&stale).unwrap();
        assert_eq!(entire.coll, to_wad(20));
        assert_eq!(entire.debt, to_wad(130));
    }

    #[test]
    fn test_inactive_trove_has_no_pending() {
        let state = RewardState {
            l_coll: to_wad(1),
            l_debt: to_wad(1),
            ..Default::default()
        };
        let mut closed = trove("e", to_wad(10), RewardSnapshot::default());
        closed.status = TroveStatus::ClosedByOwner;
        assert!(!state.has_pending_rewards(&closed));
        assert!(state.pending_rewards(&closed).unwrap().is_zero());
    }

    #[test]
    fn test_stake_correction() {
        let mut state = RewardState::default();
        assert_eq!(state.compute_new_stake(to_wad(2)).unwrap(), to_wad(2));

        state.total_stakes_snapshot = to_wad(10);
        state.total_collateral_snapshot = to_wad(20);
        assert_eq!(state.compute_new_stake(to_wad(2)).unwrap(), to_wad(1));

        state.total_stakes_snapshot = U256::zero();
        assert!(state.compute_new_stake(to_wad(2)).is_err());
    }

    #[test]
    fn test_total_stakes_after() {
        let state = RewardState {
            total_stakes: to_wad(10),
            ..Default::default()
        };
        assert_eq!(state.total_stakes_after(to_wad(4), to_wad(6)).unwrap(), to_wad(12));
        assert!(state.total_stakes_after(to_wad(11), to_wad(0)).is_err());
    }

    #[test]
    fn test_system_snapshots() {
        let state = RewardState {
            total_stakes: to_wad(7),
            ..Default::default()
        };
        let next = state.with_system_snapshots(to_wad(9));
        assert_eq!(next.total_stakes_snapshot, to_wad(7));
        assert_eq!(next.total_collateral_snapshot, to_wad(9));
    }
}

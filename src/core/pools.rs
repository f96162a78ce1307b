//! Collateral and debt pools.
//!
//! - **Active pool**: recorded collateral and debt of active troves
//! - **Default pool**: redistributed collateral and debt not yet realized
//!   into the receiving troves
//! - **Collateral surplus pool**: collateral owed back to borrowers whose
//!   troves were closed by redemption or by a capped liquidation
//! - **Staking collateral**: redemption fees owed to the staking side-ledger
//!
//! Pool balances are plain values so an operation can compute the next
//! balances up front and assign them once every check has passed.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::crypto::Address;
use crate::utils::math::{add, sub};

// ═══════════════════════════════════════════════════════════════════════════════
// POOL BALANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral and debt held by a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolBalance {
    /// Collateral held
    pub coll: U256,
    /// Debt accounted
    pub debt: U256,
}

impl PoolBalance {
    /// Balance after adding collateral and debt
    pub fn increased(&self, coll: U256, debt: U256) -> Result<Self> {
        Ok(Self {
            coll: add(self.coll, coll)?,
            debt: add(self.debt, debt)?,
        })
    }

    /// Balance after removing collateral and debt
    pub fn decreased(&self, coll: U256, debt: U256) -> Result<Self> {
        Ok(Self {
            coll: sub(self.coll, coll)?,
            debt: sub(self.debt, debt)?,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERAL SURPLUS POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Claimable collateral per borrower
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollSurplusPool {
    /// Claimable amount by borrower
    balances: BTreeMap<Address, U256>,
    /// Sum of all claimable amounts
    total: U256,
}

impl CollSurplusPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `borrower`
    pub fn account_surplus(&mut self, borrower: Address, amount: U256) -> Result<()> {
        let current = self.claimable(&borrower);
        let new_total = add(self.total, amount)?;
        self.balances.insert(borrower, add(current, amount)?);
        self.total = new_total;
        Ok(())
    }

    /// Pay out and clear `borrower`'s balance
    pub fn claim(&mut self, borrower: &Address) -> Result<U256> {
        let amount = self.claimable(borrower);
        if amount.is_zero() {
            return Err(Error::NoCollateralToClaim(*borrower));
        }
        self.total = sub(self.total, amount)?;
        self.balances.remove(borrower);
        Ok(amount)
    }

    /// Claimable balance of `borrower`
    pub fn claimable(&self, borrower: &Address) -> U256 {
        self.balances.get(borrower).copied().unwrap_or_default()
    }

    /// Sum of all claimable balances
    pub fn total(&self) -> U256 {
        self.total
    }

    /// Verify total == sum of balances
    pub fn verify_invariant(&self) -> bool {
        let sum = self
            .balances
            .values()
            .fold(U256::zero(), |acc, b| acc.saturating_add(*b));
        sum == self.total
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOLS
// ═══════════════════════════════════════════════════════════════════════════════

/// All collateral/debt pools of the system
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pools {
    /// Active troves
    pub active: PoolBalance,
    /// Pending redistributions
    pub default: PoolBalance,
    /// Claimable surpluses
    pub surplus: CollSurplusPool,
    /// Redemption fees owed to stakers
    pub staking_coll: U256,
}

impl Pools {
    /// Collateral backing the system debt (active + default)
    pub fn entire_system_coll(&self) -> Result<U256> {
        add(self.active.coll, self.default.coll)
    }

    /// Total system debt (active + default)
    pub fn entire_system_debt(&self) -> Result<U256> {
        add(self.active.debt, self.default.debt)
    }

    /// Active and default balances after realizing a trove's pending rewards
    pub fn with_pending_moved(&self, coll: U256, debt: U256) -> Result<(PoolBalance, PoolBalance)> {
        Ok((
            self.active.increased(coll, debt)?,
            self.default.decreased(coll, debt)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::math::to_wad;

    #[test]
    fn test_pool_balance_arithmetic() {
        let pool = PoolBalance::default().increased(to_wad(5), to_wad(100)).unwrap();
        let pool = pool.decreased(to_wad(2), to_wad(40)).unwrap();
        assert_eq!(pool.coll, to_wad(3));
        assert_eq!(pool.debt, to_wad(60));
        assert!(pool.decreased(to_wad(4), U256::zero()).is_err());
    }

    #[test]
    fn test_surplus_account_and_claim() {
        let alice = Address::from_label("alice");
        let mut pool = CollSurplusPool::new();
        pool.account_surplus(alice, to_wad(1)).unwrap();
        pool.account_surplus(alice, to_wad(2)).unwrap();
        assert_eq!(pool.claimable(&alice), to_wad(3));
        assert!(pool.verify_invariant());

        assert_eq!(pool.claim(&alice).unwrap(), to_wad(3));
        assert_eq!(pool.total(), U256::zero());
        assert!(matches!(pool.claim(&alice), Err(Error::NoCollateralToClaim(_))));
    }

    #[test]
    fn test_entire_system_totals() {
        let pools = Pools {
            active: PoolBalance { coll: to_wad(10), debt: to_wad(1_000) },
            default: PoolBalance { coll: to_wad(1), debt: to_wad(50) },
            ..Default::default()
        };
        assert_eq!(pools.entire_system_coll().unwrap(), to_wad(11));
        assert_eq!(pools.entire_system_debt().unwrap(), to_wad(1_050));

        let (active, default) = pools.with_pending_moved(to_wad(1), to_wad(50)).unwrap();
        assert_eq!(active.coll, to_wad(11));
        assert_eq!(default, PoolBalance::default());
        assert!(pools.with_pending_moved(to_wad(2), U256::zero()).is_err());
    }
}

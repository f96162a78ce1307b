//! Liquidation Engine for the USDD engine.
//!
//! This module computes how a liquidated trove's collateral and debt are
//! split between:
//! - The liquidator (gas compensation)
//! - The stability pool (offset)
//! - Every other active trove (redistribution)
//! - The borrower (capped Recovery Mode liquidations leave a surplus)
//!
//! The functions here are pure; the ledger applies the resulting totals.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::cmp::min;

use crate::core::config::ProtocolParams;
use crate::error::Result;
use crate::utils::constants::ONE_HUNDRED_PERCENT;
use crate::utils::math::{add, mul_div, sub};

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION MODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Mode a trove was liquidated under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationMode {
    /// ICR < MCR with TCR ≥ CCR
    Normal,
    /// TCR < CCR at the time of the liquidation
    Recovery,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION VALUES
// ═══════════════════════════════════════════════════════════════════════════════

/// How one trove's collateral and debt are disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiquidationValues {
    /// Debt including pending rewards
    pub entire_trove_debt: U256,
    /// Collateral including pending rewards
    pub entire_trove_coll: U256,
    /// Collateral paid to the liquidator
    pub coll_gas_compensation: U256,
    /// USDD paid to the liquidator from the gas pool
    pub debt_gas_compensation: U256,
    /// Debt cancelled against the stability pool
    pub debt_to_offset: U256,
    /// Collateral sent to the stability pool
    pub coll_to_send_to_sp: U256,
    /// Debt spread over the remaining troves
    pub debt_to_redistribute: U256,
    /// Collateral spread over the remaining troves
    pub coll_to_redistribute: U256,
    /// Collateral returned to the borrower through the surplus pool
    pub coll_surplus: U256,
}

impl LiquidationValues {
    /// Collateral that leaves the active and default pools for good
    pub fn coll_leaving_system(&self) -> Result<U256> {
        add(add(self.coll_to_send_to_sp, self.coll_gas_compensation)?, self.coll_surplus)
    }
}

/// Collateral share paid to the liquidator: `coll / percent_divisor`
pub fn coll_gas_compensation(entire_coll: U256, params: &ProtocolParams) -> U256 {
    entire_coll / U256::from(params.percent_divisor)
}

/// Split `debt`/`coll` between the stability pool and redistribution.
///
/// Returns `(debt_to_offset, coll_to_sp, debt_to_redistribute, coll_to_redistribute)`.
/// The pool takes as much debt as it holds, with collateral pro rata.
pub fn offset_and_redistribution(
    debt: U256,
    coll: U256,
    sp_deposits: U256,
) -> Result<(U256, U256, U256, U256)> {
    if sp_deposits.is_zero() || debt.is_zero() {
        return Ok((U256::zero(), U256::zero(), debt, coll));
    }
    let debt_to_offset = min(debt, sp_deposits);
    let coll_to_sp = mul_div(coll, debt_to_offset, debt)?;
    Ok((
        debt_to_offset,
        coll_to_sp,
        debt - debt_to_offset,
        sub(coll, coll_to_sp)?,
    ))
}

/// Values for a trove liquidated under the MCR rule
pub fn normal_mode_values(
    entire_debt: U256,
    entire_coll: U256,
    sp_deposits: U256,
    params: &ProtocolParams,
) -> Result<LiquidationValues> {
    let coll_gas = coll_gas_compensation(entire_coll, params);
    let coll_to_liquidate = sub(entire_coll, coll_gas)?;
    let (debt_to_offset, coll_to_send_to_sp, debt_to_redistribute, coll_to_redistribute) =
        offset_and_redistribution(entire_debt, coll_to_liquidate, sp_deposits)?;

    Ok(LiquidationValues {
        entire_trove_debt: entire_debt,
        entire_trove_coll: entire_coll,
        coll_gas_compensation: coll_gas,
        debt_gas_compensation: params.gas_compensation,
        debt_to_offset,
        coll_to_send_to_sp,
        debt_to_redistribute,
        coll_to_redistribute,
        coll_surplus: U256::zero(),
    })
}

/// Values for a trove with ICR ≤ 100%: everything is redistributed
pub fn full_redistribution_values(
    entire_debt: U256,
    entire_coll: U256,
    params: &ProtocolParams,
) -> Result<LiquidationValues> {
    let coll_gas = coll_gas_compensation(entire_coll, params);
    Ok(LiquidationValues {
        entire_trove_debt: entire_debt,
        entire_trove_coll: entire_coll,
        coll_gas_compensation: coll_gas,
        debt_gas_compensation: params.gas_compensation,
        debt_to_redistribute: entire_debt,
        coll_to_redistribute: sub(entire_coll, coll_gas)?,
        ..Default::default()
    })
}

/// Values for a Recovery Mode liquidation with MCR ≤ ICR < TCR.
///
/// The pool cancels the whole debt but only takes collateral worth
/// `debt * MCR`; the remainder becomes the borrower's surplus.
pub fn capped_offset_values(
    entire_debt: U256,
    entire_coll: U256,
    price: U256,
    params: &ProtocolParams,
) -> Result<LiquidationValues> {
    let capped_coll = mul_div(entire_debt, params.mcr, price)?;
    let coll_gas = coll_gas_compensation(capped_coll, params);
    Ok(LiquidationValues {
        entire_trove_debt: entire_debt,
        entire_trove_coll: entire_coll,
        coll_gas_compensation: coll_gas,
        debt_gas_compensation: params.gas_compensation,
        debt_to_offset: entire_debt,
        coll_to_send_to_sp: sub(capped_coll, coll_gas)?,
        coll_surplus: sub(entire_coll, capped_coll)?,
        ..Default::default()
    })
}

/// Values for a trove considered under Recovery Mode, or `None` when it is skipped.
///
/// - ICR ≤ 100%: full redistribution
/// - ICR < MCR: offset, then redistribute
/// - MCR ≤ ICR < TCR and the pool covers the whole debt: capped offset
pub fn recovery_mode_values(
    entire_debt: U256,
    entire_coll: U256,
    icr: U256,
    tcr: U256,
    price: U256,
    sp_deposits: U256,
    params: &ProtocolParams,
) -> Result<Option<LiquidationValues>> {
    if icr <= ONE_HUNDRED_PERCENT {
        return full_redistribution_values(entire_debt, entire_coll, params).map(Some);
    }
    if icr < params.mcr {
        return normal_mode_values(entire_debt, entire_coll, sp_deposits, params).map(Some);
    }
    if icr < tcr && entire_debt <= sp_deposits {
        return capped_offset_values(entire_debt, entire_coll, price, params).map(Some);
    }
    Ok(None)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION TOTALS
// ═══════════════════════════════════════════════════════════════════════════════

/// Sum of the values of every trove liquidated in one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiquidationTotals {
    /// Collateral of liquidated troves (pending included)
    pub total_coll_in_sequence: U256,
    /// Debt of liquidated troves (pending included)
    pub total_debt_in_sequence: U256,
    /// Collateral paid to the liquidator
    pub total_coll_gas_compensation: U256,
    /// USDD paid to the liquidator
    pub total_debt_gas_compensation: U256,
    /// Debt cancelled against the stability pool
    pub total_debt_to_offset: U256,
    /// Collateral sent to the stability pool
    pub total_coll_to_send_to_sp: U256,
    /// Debt redistributed
    pub total_debt_to_redistribute: U256,
    /// Collateral redistributed
    pub total_coll_to_redistribute: U256,
    /// Collateral credited to surplus balances
    pub total_coll_surplus: U256,
}

impl LiquidationTotals {
    /// Add one trove's values
    pub fn add(&mut self, values: &LiquidationValues) -> Result<()> {
        *self = Self {
            total_coll_in_sequence: add(self.total_coll_in_sequence, values.entire_trove_coll)?,
            total_debt_in_sequence: add(self.total_debt_in_sequence, values.entire_trove_debt)?,
            total_coll_gas_compensation: add(
                self.total_coll_gas_compensation,
                values.coll_gas_compensation,
            )?,
            total_debt_gas_compensation: add(
                self.total_debt_gas_compensation,
                values.debt_gas_compensation,
            )?,
            total_debt_to_offset: add(self.total_debt_to_offset, values.debt_to_offset)?,
            total_coll_to_send_to_sp: add(self.total_coll_to_send_to_sp, values.coll_to_send_to_sp)?,
            total_debt_to_redistribute: add(
                self.total_debt_to_redistribute,
                values.debt_to_redistribute,
            )?,
            total_coll_to_redistribute: add(
                self.total_coll_to_redistribute,
                values.coll_to_redistribute,
            )?,
            total_coll_surplus: add(self.total_coll_surplus, values.coll_surplus)?,
        };
        Ok(())
    }

    /// Whether nothing was liquidated
    pub fn is_empty(&self) -> bool {
        self.total_debt_in_sequence.is_zero()
    }
}

//! Recovery Mode gating.
//!
//! Recovery Mode is active whenever the Total Collateralization Ratio (TCR)
//! is below the Critical Collateralization Ratio (CCR). It is recomputed from
//! the aggregates and the price on every call, never cached. While active:
//!
//! 1. **Collateral withdrawal banned**: no trove may withdraw collateral
//! 2. **Debt increases restricted**: the trove must end at or above CCR and
//!    must not lower its own ratio
//! 3. **Borrowing fee waived**
//! 4. **Closing banned**
//! 5. **Liquidation threshold raised**: troves below the TCR become
//!    liquidatable (with the collateral taken capped at MCR)
//!
//! Every check here works on "would-be" ratios computed from a proposed
//! change, so a rejection happens before anything is written.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::config::ProtocolParams;
use crate::error::{Error, RatioCheck, Result};
use crate::utils::math::{apply_change, compute_cr, compute_nominal_cr, format_wad};

// ═══════════════════════════════════════════════════════════════════════════════
// RECOVERY MODE STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// System collateralization at a given price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryModeStatus {
    /// Whether Recovery Mode is active
    pub is_active: bool,
    /// Total Collateralization Ratio
    pub tcr: U256,
    /// Entire system collateral
    pub system_coll: U256,
    /// Entire system debt
    pub system_debt: U256,
    /// Price used
    pub price: U256,
}

impl RecoveryModeStatus {
    /// Evaluate the system at `price`
    pub fn evaluate(
        system_coll: U256,
        system_debt: U256,
        price: U256,
        params: &ProtocolParams,
    ) -> Result<Self> {
        let tcr = compute_cr(system_coll, system_debt, price)?;
        Ok(Self {
            is_active: tcr < params.ccr,
            tcr,
            system_coll,
            system_debt,
            price,
        })
    }
}

/// Whether a system with these totals is in Recovery Mode
pub fn check_potential_recovery_mode(
    system_coll: U256,
    system_debt: U256,
    price: U256,
    params: &ProtocolParams,
) -> Result<bool> {
    Ok(compute_cr(system_coll, system_debt, price)? < params.ccr)
}

// ═══════════════════════════════════════════════════════════════════════════════
// WOULD-BE RATIOS
// ═══════════════════════════════════════════════════════════════════════════════

/// A proposed change to collateral and debt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceChange {
    /// Collateral moved
    pub coll_change: U256,
    /// Whether collateral is added
    pub is_coll_increase: bool,
    /// Debt moved (fee and gas compensation included)
    pub debt_change: U256,
    /// Whether debt is added
    pub is_debt_increase: bool,
}

impl BalanceChange {
    /// Collateral and debt after applying the change
    pub fn apply(&self, coll: U256, debt: U256) -> Result<(U256, U256)> {
        Ok((
            apply_change(coll, self.coll_change, self.is_coll_increase)?,
            apply_change(debt, self.debt_change, self.is_debt_increase)?,
        ))
    }

    /// Trove ratio after the change
    pub fn new_icr(&self, coll: U256, debt: U256, price: U256) -> Result<U256> {
        let (coll, debt) = self.apply(coll, debt)?;
        compute_cr(coll, debt, price)
    }

    /// Trove nominal ratio after the change
    pub fn new_nicr(&self, coll: U256, debt: U256) -> Result<U256> {
        let (coll, debt) = self.apply(coll, debt)?;
        compute_nominal_cr(coll, debt)
    }

    /// System ratio after the change
    pub fn new_tcr(&self, system_coll: U256, system_debt: U256, price: U256) -> Result<U256> {
        let (coll, debt) = self.apply(system_coll, system_debt)?;
        compute_cr(coll, debt, price)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUIREMENTS
// ═══════════════════════════════════════════════════════════════════════════════

fn violation(check: RatioCheck, ratio: U256, required: U256) -> Error {
    Error::CollateralizationViolation {
        check,
        ratio,
        required,
    }
}

/// ICR ≥ MCR
pub fn require_icr_above_mcr(icr: U256, params: &ProtocolParams) -> Result<()> {
    if icr < params.mcr {
        return Err(violation(RatioCheck::IcrBelowMcr, icr, params.mcr));
    }
    Ok(())
}

/// ICR ≥ CCR
pub fn require_icr_above_ccr(icr: U256, params: &ProtocolParams) -> Result<()> {
    if icr < params.ccr {
        return Err(violation(RatioCheck::IcrBelowCcr, icr, params.ccr));
    }
    Ok(())
}

/// New TCR ≥ CCR
pub fn require_new_tcr_above_ccr(new_tcr: U256, params: &ProtocolParams) -> Result<()> {
    if new_tcr < params.ccr {
        return Err(violation(RatioCheck::TcrBelowCcr, new_tcr, params.ccr));
    }
    Ok(())
}

/// New ICR ≥ old ICR
pub fn require_new_icr_above_old(new_icr: U256, old_icr: U256) -> Result<()> {
    if new_icr < old_icr {
        return Err(violation(RatioCheck::IcrNotImproved, new_icr, old_icr));
    }
    Ok(())
}

/// TCR ≥ MCR (redemptions)
pub fn require_tcr_above_mcr(tcr: U256, params: &ProtocolParams) -> Result<()> {
    if tcr < params.mcr {
        return Err(violation(RatioCheck::TcrBelowMcr, tcr, params.mcr));
    }
    Ok(())
}

/// Not in Recovery Mode
pub fn require_not_in_recovery_mode(recovery_mode: bool, operation: &str) -> Result<()> {
    if recovery_mode {
        return Err(Error::RecoveryModeRestriction(format!(
            "{} not allowed in Recovery Mode",
            operation
        )));
    }
    Ok(())
}

/// Ratio checks for an adjustment, by mode.
///
/// Recovery Mode: no collateral withdrawal; a debt increase must leave the
/// trove at or above CCR and must not lower its ratio.
/// Normal Mode: the trove stays at or above MCR and the system at or above CCR.
pub fn require_valid_adjustment_in_current_mode(
    recovery_mode: bool,
    coll_withdrawal: U256,
    is_debt_increase: bool,
    old_icr: U256,
    new_icr: U256,
    new_tcr: U256,
    params: &ProtocolParams,
) -> Result<()> {
    if recovery_mode {
        if !coll_withdrawal.is_zero() {
            return Err(Error::RecoveryModeRestriction(
                "collateral withdrawal not permitted in Recovery Mode".into(),
            ));
        }
        if is_debt_increase {
            require_icr_above_ccr(new_icr, params)?;
            require_new_icr_above_old(new_icr, old_icr)?;
        }
        return Ok(());
    }

    require_icr_above_mcr(new_icr, params)?;
    require_new_tcr_above_ccr(new_tcr, params)
}

/// Ratio checks for opening a trove, by mode
pub fn require_valid_open_in_current_mode(
    recovery_mode: bool,
    icr: U256,
    new_tcr: U256,
    params: &ProtocolParams,
) -> Result<()> {
    if recovery_mode {
        return require_icr_above_ccr(icr, params);
    }
    require_icr_above_mcr(icr, params)?;
    require_new_tcr_above_ccr(new_tcr, params)
}

/// Human-readable ratio for log lines
pub fn describe_ratio(ratio: U256) -> String {
    if ratio == U256::MAX {
        return "inf".into();
    }
    format!("{}%", format_wad(ratio.saturating_mul(U256::from(100u64))))
}

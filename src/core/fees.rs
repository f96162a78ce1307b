//! Decaying base-rate fee engine.
//!
//! A single `base_rate` drives both borrowing and redemption fees. It decays
//! exponentially per elapsed minute and is bumped by redemptions in
//! proportion to the share of the debt supply they redeem.
//!
//! # Fee Types
//!
//! - **Borrowing Fee**: `clamp(decayed_base_rate, floor, max) * requested_debt`,
//!   charged on debt issuance outside Recovery Mode
//! - **Redemption Fee**: `min(floor + base_rate, 100%) * collateral_drawn`
//!
//! All computations are staged: a [`FeeQuote`] carries the fee and the
//! `FeeState` that would result, and the caller commits it only after every
//! other check of the operation has passed.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::cmp::{max, min};

use crate::core::config::ProtocolParams;
use crate::error::{Error, Result};
use crate::utils::constants::{DECIMAL_PRECISION, ONE_HUNDRED_PERCENT, SECONDS_IN_ONE_MINUTE};
use crate::utils::math::{add, dec_pow, format_wad, mul_div};

// ═══════════════════════════════════════════════════════════════════════════════
// FEE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistent state of the fee engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeState {
    /// Base rate in [0, 1] (18 decimals)
    pub base_rate: U256,
    /// Timestamp (seconds) of the last decay-clock update
    pub last_fee_operation_time: u64,
}

/// A fee computed against a staged fee state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    /// Fee amount (debt tokens for borrowing, collateral for redemption)
    pub fee: U256,
    /// Rate the fee was computed at
    pub rate: U256,
    /// Fee state to commit if the operation succeeds
    pub next_state: FeeState,
}

impl FeeQuote {
    /// Whether committing this quote changes the decay clock
    pub fn updates_clock(&self, current: &FeeState) -> bool {
        self.next_state.last_fee_operation_time != current.last_fee_operation_time
    }
}

impl FeeState {
    /// Create with an explicit base rate and clock
    pub fn new(base_rate: U256, last_fee_operation_time: u64) -> Self {
        Self {
            base_rate: min(base_rate, ONE_HUNDRED_PERCENT),
            last_fee_operation_time,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DECAY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Whole minutes since the decay clock was last set
    pub fn minutes_passed(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_fee_operation_time) / SECONDS_IN_ONE_MINUTE
    }

    /// `base_rate * decay_factor ^ minutes_passed`
    pub fn decayed_base_rate(&self, params: &ProtocolParams, now: u64) -> Result<U256> {
        let decay = dec_pow(params.minute_decay_factor, self.minutes_passed(now))?;
        mul_div(self.base_rate, decay, DECIMAL_PRECISION)
    }

    /// State after setting `base_rate`, advancing the clock only if a full minute passed
    fn advanced(&self, base_rate: U256, now: u64) -> FeeState {
        let elapsed = now.saturating_sub(self.last_fee_operation_time);
        FeeState {
            base_rate: min(base_rate, ONE_HUNDRED_PERCENT),
            last_fee_operation_time: if elapsed >= SECONDS_IN_ONE_MINUTE {
                now
            } else {
                self.last_fee_operation_time
            },
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BORROWING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Borrowing rate for a given base rate
    pub fn borrowing_rate_for(params: &ProtocolParams, base_rate: U256) -> U256 {
        min(
            max(params.borrowing_fee_floor, base_rate),
            params.max_borrowing_fee,
        )
    }

    /// Current borrowing rate with decay applied
    pub fn borrowing_rate(&self, params: &ProtocolParams, now: u64) -> Result<U256> {
        Ok(Self::borrowing_rate_for(params, self.decayed_base_rate(params, now)?))
    }

    /// Current borrowing fee on `debt` with decay applied
    pub fn borrowing_fee(&self, params: &ProtocolParams, now: u64, debt: U256) -> Result<U256> {
        mul_div(self.borrowing_rate(params, now)?, debt, DECIMAL_PRECISION)
    }

    /// Stage a borrowing fee on `requested` debt.
    ///
    /// Borrowing decays the base rate without bumping it.
    pub fn quote_borrowing(
        &self,
        params: &ProtocolParams,
        now: u64,
        requested: U256,
        max_fee_percentage: U256,
    ) -> Result<FeeQuote> {
        let decayed = self.decayed_base_rate(params, now)?;
        let rate = Self::borrowing_rate_for(params, decayed);
        let fee = mul_div(rate, requested, DECIMAL_PRECISION)?;
        require_user_accepts_fee(fee, requested, max_fee_percentage)?;

        Ok(FeeQuote {
            fee,
            rate,
            next_state: self.advanced(decayed, now),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REDEMPTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Redemption rate for a given base rate
    pub fn redemption_rate_for(params: &ProtocolParams, base_rate: U256) -> U256 {
        min(
            params.redemption_fee_floor.saturating_add(base_rate),
            ONE_HUNDRED_PERCENT,
        )
    }

    /// Current redemption rate with decay applied
    pub fn redemption_rate(&self, params: &ProtocolParams, now: u64) -> Result<U256> {
        Ok(Self::redemption_rate_for(params, self.decayed_base_rate(params, now)?))
    }

    /// Stage a redemption of `coll_drawn` collateral.
    ///
    /// The base rate is decayed, then bumped by the redeemed fraction of
    /// `total_debt_supply` divided by `beta`; the fee uses the bumped rate.
    pub fn quote_redemption(
        &self,
        params: &ProtocolParams,
        now: u64,
        coll_drawn: U256,
        price: U256,
        total_debt_supply: U256,
        max_fee_percentage: U256,
    ) -> Result<FeeQuote> {
        let decayed = self.decayed_base_rate(params, now)?;
        let redeemed_fraction = mul_div(coll_drawn, price, total_debt_supply)?;
        let bump = redeemed_fraction / params.beta;
        let new_base_rate = min(add(decayed, bump)?, ONE_HUNDRED_PERCENT);
        if new_base_rate.is_zero() {
            return Err(Error::InvariantViolation(
                "redemption left the base rate at zero".into(),
            ));
        }

        let rate = Self::redemption_rate_for(params, new_base_rate);
        let fee = mul_div(rate, coll_drawn, DECIMAL_PRECISION)?;
        if fee >= coll_drawn {
            return Err(Error::FeeBoundsViolation(
                "fee would eat up all returned collateral".into(),
            ));
        }
        require_user_accepts_fee(fee, coll_drawn, max_fee_percentage)?;

        Ok(FeeQuote {
            fee,
            rate,
            next_state: self.advanced(new_base_rate, now),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEE BOUNDS
// ═══════════════════════════════════════════════════════════════════════════════

/// `max_fee_percentage` must be ≤ 100%, and ≥ the borrowing floor outside Recovery Mode
pub fn require_valid_max_fee_percentage(
    params: &ProtocolParams,
    max_fee_percentage: U256,
    recovery_mode: bool,
) -> Result<()> {
    if max_fee_percentage > ONE_HUNDRED_PERCENT {
        return Err(Error::FeeBoundsViolation(format!(
            "max fee percentage {} must be less than or equal to 100%",
            format_wad(max_fee_percentage)
        )));
    }
    if !recovery_mode && max_fee_percentage < params.borrowing_fee_floor {
        return Err(Error::FeeBoundsViolation(format!(
            "max fee percentage {} must be between {} and 100%",
            format_wad(max_fee_percentage),
            format_wad(params.borrowing_fee_floor)
        )));
    }
    Ok(())
}

/// Redemptions always require floor ≤ max fee ≤ 100%
pub fn require_valid_redemption_max_fee(
    params: &ProtocolParams,
    max_fee_percentage: U256,
) -> Result<()> {
    if max_fee_percentage < params.redemption_fee_floor || max_fee_percentage > ONE_HUNDRED_PERCENT
    {
        return Err(Error::FeeBoundsViolation(format!(
            "max fee percentage {} must be between {} and 100%",
            format_wad(max_fee_percentage),
            format_wad(params.redemption_fee_floor)
        )));
    }
    Ok(())
}

/// `fee / amount` must not exceed `max_fee_percentage`
pub fn require_user_accepts_fee(fee: U256, amount: U256, max_fee_percentage: U256) -> Result<()> {
    if amount.is_zero() {
        return Ok(());
    }
    let fee_percentage = mul_div(fee, DECIMAL_PRECISION, amount)?;
    if fee_percentage > max_fee_percentage {
        return Err(Error::FeeBoundsViolation(format!(
            "fee {} exceeded provided maximum {}",
            format_wad(fee_percentage),
            format_wad(max_fee_percentage)
        )));
    }
    Ok(())
}

//! Protocol configuration and parameters.
//!
//! This module defines the configurable parameters of the engine and the
//! protocol-internal addresses that the debt token refuses to receive
//! ordinary transfers on.
//!
//! Parameters can be built in code, loaded from a JSON file, or overlaid
//! from `USDD_*` environment variables. Amounts in files are decimal strings
//! (`"1.1"`, `"200"`).

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::crypto::Address;
use crate::utils::math::{decimal_string, parse_wad, to_wad};

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol parameters (fixed for the lifetime of a ledger)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// Minimum collateral ratio (MCR)
    /// Below this, troves can be liquidated
    #[serde(with = "decimal_string")]
    pub mcr: U256,

    /// Critical collateral ratio (CCR)
    /// When system TCR falls below this, Recovery Mode applies
    #[serde(with = "decimal_string")]
    pub ccr: U256,

    /// Debt reserved on open and paid to liquidators
    #[serde(with = "decimal_string")]
    pub gas_compensation: U256,

    /// Minimum net debt (debt minus gas compensation) of an active trove
    #[serde(with = "decimal_string")]
    pub min_net_debt: U256,

    /// Lowest borrowing rate
    #[serde(with = "decimal_string")]
    pub borrowing_fee_floor: U256,

    /// Highest borrowing rate
    #[serde(with = "decimal_string")]
    pub max_borrowing_fee: U256,

    /// Lowest redemption rate
    #[serde(with = "decimal_string")]
    pub redemption_fee_floor: U256,

    /// Per-minute base rate decay factor
    #[serde(with = "decimal_string")]
    pub minute_decay_factor: U256,

    /// Divisor of the redeemed supply fraction added to the base rate
    pub beta: u64,

    /// Liquidated collateral share paid as gas compensation (1 / percent_divisor)
    pub percent_divisor: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            mcr: MIN_COLLATERAL_RATIO,
            ccr: CRITICAL_COLLATERAL_RATIO,
            gas_compensation: to_wad(GAS_COMPENSATION_UNITS),
            min_net_debt: to_wad(MIN_NET_DEBT_UNITS),
            borrowing_fee_floor: BORROWING_FEE_FLOOR,
            max_borrowing_fee: MAX_BORROWING_FEE,
            redemption_fee_floor: REDEMPTION_FEE_FLOOR,
            minute_decay_factor: MINUTE_DECAY_FACTOR,
            beta: BETA,
            percent_divisor: PERCENT_DIVISOR,
        }
    }
}

impl ProtocolParams {
    /// Override the minimum collateral ratio
    pub fn with_mcr(mut self, mcr: U256) -> Self {
        self.mcr = mcr;
        self
    }

    /// Override the critical collateral ratio
    pub fn with_ccr(mut self, ccr: U256) -> Self {
        self.ccr = ccr;
        self
    }

    /// Override the gas compensation reserve
    pub fn with_gas_compensation(mut self, amount: U256) -> Self {
        self.gas_compensation = amount;
        self
    }

    /// Override the minimum net debt
    pub fn with_min_net_debt(mut self, amount: U256) -> Self {
        self.min_net_debt = amount;
        self
    }

    /// Override the borrowing fee floor and ceiling
    pub fn with_borrowing_fees(mut self, floor: U256, max: U256) -> Self {
        self.borrowing_fee_floor = floor;
        self.max_borrowing_fee = max;
        self
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &str, reason: &str| {
            Err(Error::Config(format!("{}: {}", name, reason)))
        };

        if self.mcr <= ONE_HUNDRED_PERCENT {
            return invalid("mcr", "must exceed 100%");
        }
        if self.ccr <= self.mcr {
            return invalid("ccr", "must exceed mcr");
        }
        if self.min_net_debt.is_zero() {
            return invalid("min_net_debt", "must be positive");
        }
        if self.borrowing_fee_floor > ONE_HUNDRED_PERCENT
            || self.redemption_fee_floor > ONE_HUNDRED_PERCENT
        {
            return invalid("fee floor", "must not exceed 100%");
        }
        if self.max_borrowing_fee < self.borrowing_fee_floor
            || self.max_borrowing_fee > ONE_HUNDRED_PERCENT
        {
            return invalid("max_borrowing_fee", "must lie between the floor and 100%");
        }
        if self.minute_decay_factor.is_zero() || self.minute_decay_factor >= DECIMAL_PRECISION {
            return invalid("minute_decay_factor", "must lie strictly between 0 and 1");
        }
        if self.beta == 0 {
            return invalid("beta", "must be positive");
        }
        if self.percent_divisor == 0 {
            return invalid("percent_divisor", "must be positive");
        }
        Ok(())
    }

    /// Parse from a JSON document and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Load from a JSON file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Save as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Defaults overlaid with `USDD_*` environment variables.
    ///
    /// Unparsable values are ignored; call [`ProtocolParams::validate`] on
    /// the result before use.
    pub fn from_env() -> Self {
        let mut params = Self::default();

        let read = |key: &str| std::env::var(key).ok().and_then(|v| parse_wad(&v).ok());

        if let Some(v) = read("USDD_MCR") {
            params.mcr = v;
        }
        if let Some(v) = read("USDD_CCR") {
            params.ccr = v;
        }
        if let Some(v) = read("USDD_GAS_COMPENSATION") {
            params.gas_compensation = v;
        }
        if let Some(v) = read("USDD_MIN_NET_DEBT") {
            params.min_net_debt = v;
        }

        params
    }

    /// Minimum total debt of an active trove
    pub fn min_debt(&self) -> U256 {
        self.min_net_debt + self.gas_compensation
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL ADDRESSES
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol-internal accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAddresses {
    /// Holds collateral and debt of active troves
    pub active_pool: Address,
    /// Holds redistributed collateral and debt not yet realized into troves
    pub default_pool: Address,
    /// Stability pool, holds deposited debt tokens
    pub stability_pool: Address,
    /// Holds the gas compensation reserve of every trove
    pub gas_pool: Address,
    /// Holds claimable collateral surpluses
    pub coll_surplus_pool: Address,
    /// Fee recipient (staking side-ledger)
    pub staking: Address,
}

impl Default for ProtocolAddresses {
    fn default() -> Self {
        Self {
            active_pool: Address::from_label("usdd/active-pool"),
            default_pool: Address::from_label("usdd/default-pool"),
            stability_pool: Address::from_label("usdd/stability-pool"),
            gas_pool: Address::from_label("usdd/gas-pool"),
            coll_surplus_pool: Address::from_label("usdd/coll-surplus-pool"),
            staking: Address::from_label("usdd/staking"),
        }
    }
}

impl ProtocolAddresses {
    /// Addresses that may not receive ordinary debt token transfers
    pub fn blacklist(&self) -> Vec<Address> {
        vec![
            self.active_pool,
            self.default_pool,
            self.stability_pool,
            self.gas_pool,
            self.coll_surplus_pool,
            self.staking,
        ]
    }
}

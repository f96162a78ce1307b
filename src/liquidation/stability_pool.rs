//! Stability Pool implementation.
//!
//! Depositors lock USDD that is burned to cancel liquidated debt; in return
//! they receive the liquidated collateral pro rata. Individual deposits are
//! never iterated. Two running factors track every depositor at once:
//!
//! - **P** (product): a deposit made when the product was `P_0` is now worth
//!   `initial * P / P_0`
//! - **S** (sum): the collateral gain per unit deposited, weighted by P,
//!   accumulated per epoch and scale
//!
//! When P would drop below `1e9` it is multiplied up by [`SP_SCALE_FACTOR`]
//! and the scale increments. A liquidation that empties the pool starts a
//! new epoch, and deposits from earlier epochs are worth zero.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::constants::{DECIMAL_PRECISION, SP_SCALE_FACTOR};
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::{add, mul, mul_div, sub};

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSITOR SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool factors as of a depositor's last change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositorSnapshot {
    /// Product factor
    pub p: U256,
    /// Sum factor at the snapshot's epoch and scale
    pub s: U256,
    /// Epoch
    pub epoch: u64,
    /// Scale
    pub scale: u64,
}

/// A single deposit in the stability pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Amount at the last change (before later losses)
    pub initial_value: U256,
    /// Factors at the last change
    pub snapshot: DepositorSnapshot,
}

/// Effect of a deposit or withdrawal on one depositor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepositChange {
    /// Deposit value just before the change
    pub compounded_before: U256,
    /// Deposit value after the change
    pub new_deposit: U256,
    /// USDD returned to the depositor
    pub withdrawn: U256,
    /// Collateral gain paid out
    pub coll_gain: U256,
    /// Value absorbed by liquidations since the previous change
    pub deposit_loss: U256,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// The Stability Pool for absorbing liquidations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityPool {
    /// USDD currently deposited
    total_deposits: U256,
    /// Collateral held for depositors
    total_coll: U256,
    /// Product factor
    p: U256,
    /// Current scale
    current_scale: u64,
    /// Current epoch
    current_epoch: u64,
    /// S per epoch and scale
    epoch_to_scale_to_sum: BTreeMap<u64, BTreeMap<u64, U256>>,
    /// Collateral truncation carried between offsets
    last_coll_error_offset: U256,
    /// Loss rounding carried between offsets
    last_debt_loss_error_offset: U256,
    /// Deposits by owner
    deposits: BTreeMap<Address, Deposit>,
    /// Number of offsets absorbed
    total_offsets: u64,
}

impl Default for StabilityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            total_deposits: U256::zero(),
            total_coll: U256::zero(),
            p: DECIMAL_PRECISION,
            current_scale: 0,
            current_epoch: 0,
            epoch_to_scale_to_sum: BTreeMap::new(),
            last_coll_error_offset: U256::zero(),
            last_debt_loss_error_offset: U256::zero(),
            deposits: BTreeMap::new(),
            total_offsets: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSITS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add `amount` to `owner`'s deposit, paying out the accrued collateral gain
    pub fn deposit(&mut self, owner: Address, amount: U256) -> Result<DepositChange> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        let compounded = self.compounded_deposit(&owner)?;
        let coll_gain = self.depositor_coll_gain(&owner)?;
        let initial = self.initial_deposit(&owner);

        let new_deposit = add(compounded, amount)?;
        let total_deposits = add(self.total_deposits, amount)?;
        let total_coll = sub(self.total_coll, coll_gain)?;

        self.total_deposits = total_deposits;
        self.total_coll = total_coll;
        self.update_deposit_and_snapshot(owner, new_deposit);

        Ok(DepositChange {
            compounded_before: compounded,
            new_deposit,
            withdrawn: U256::zero(),
            coll_gain,
            deposit_loss: initial.saturating_sub(compounded),
        })
    }

    /// Withdraw up to `amount` from `owner`'s deposit, paying out the accrued collateral gain.
    ///
    /// A zero `amount` only pays out the gain.
    pub fn withdraw(&mut self, owner: &Address, amount: U256) -> Result<DepositChange> {
        let initial = self.initial_deposit(owner);
        if initial.is_zero() {
            return Err(Error::NoDeposit(*owner));
        }

        let compounded = self.compounded_deposit(owner)?;
        let coll_gain = self.depositor_coll_gain(owner)?;
        let withdrawn = amount.min(compounded);
        let new_deposit = compounded - withdrawn;

        let total_deposits = sub(self.total_deposits, withdrawn)?;
        let total_coll = sub(self.total_coll, coll_gain)?;

        self.total_deposits = total_deposits;
        self.total_coll = total_coll;
        self.update_deposit_and_snapshot(*owner, new_deposit);

        Ok(DepositChange {
            compounded_before: compounded,
            new_deposit,
            withdrawn,
            coll_gain,
            deposit_loss: initial.saturating_sub(compounded),
        })
    }

    fn update_deposit_and_snapshot(&mut self, owner: Address, new_value: U256) {
        if new_value.is_zero() {
            self.deposits.remove(&owner);
            return;
        }
        let snapshot = DepositorSnapshot {
            p: self.p,
            s: self.sum_at(self.current_epoch, self.current_scale),
            epoch: self.current_epoch,
            scale: self.current_scale,
        };
        self.deposits.insert(
            owner,
            Deposit {
                initial_value: new_value,
                snapshot,
            },
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION ABSORPTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cancel `debt` against deposits and take in `coll` for depositors.
    ///
    /// `debt` must not exceed the deposits. Burning the matching USDD is the
    /// caller's job.
    pub fn offset(&mut self, debt: U256, coll: U256) -> Result<()> {
        if self.total_deposits.is_zero() || debt.is_zero() {
            return Ok(());
        }
        if debt > self.total_deposits {
            return Err(Error::InvariantViolation(format!(
                "offset of {} exceeds stability deposits {}",
                debt, self.total_deposits
            )));
        }

        let total = self.total_deposits;

        // Collateral gain per unit deposited, remainder carried forward
        let coll_numerator = add(mul(coll, DECIMAL_PRECISION)?, self.last_coll_error_offset)?;
        let coll_gain_per_unit = coll_numerator / total;
        let last_coll_error_offset = coll_numerator - coll_gain_per_unit * total;

        // Deposit loss per unit, rounded up so depositors never claim more than remains
        let (loss_per_unit, last_debt_loss_error_offset) = if debt == total {
            (DECIMAL_PRECISION, U256::zero())
        } else {
            let loss_numerator = sub(mul(debt, DECIMAL_PRECISION)?, self.last_debt_loss_error_offset)?;
            let per_unit = loss_numerator / total + U256::one();
            (per_unit, per_unit * total - loss_numerator)
        };

        let current_sum = self.sum_at(self.current_epoch, self.current_scale);
        let new_sum = add(current_sum, mul(coll_gain_per_unit, self.p)?)?;

        let new_product_factor = sub(DECIMAL_PRECISION, loss_per_unit)?;
        let (new_p, new_epoch, new_scale) = if new_product_factor.is_zero() {
            (DECIMAL_PRECISION, self.current_epoch + 1, 0)
        } else {
            let scaled = mul_div(self.p, new_product_factor, DECIMAL_PRECISION)?;
            if scaled < SP_SCALE_FACTOR {
                let p = mul_div(mul(self.p, new_product_factor)?, SP_SCALE_FACTOR, DECIMAL_PRECISION)?;
                (p, self.current_epoch, self.current_scale + 1)
            } else {
                (scaled, self.current_epoch, self.current_scale)
            }
        };
        if new_p.is_zero() {
            return Err(Error::InvariantViolation("product factor reached zero".into()));
        }

        let total_deposits = total - debt;
        let total_coll = add(self.total_coll, coll)?;

        self.epoch_to_scale_to_sum
            .entry(self.current_epoch)
            .or_default()
            .insert(self.current_scale, new_sum);
        self.p = new_p;
        self.current_epoch = new_epoch;
        self.current_scale = new_scale;
        self.last_coll_error_offset = last_coll_error_offset;
        self.last_debt_loss_error_offset = last_debt_loss_error_offset;
        self.total_deposits = total_deposits;
        self.total_coll = total_coll;
        self.total_offsets += 1;

        tracing::debug!(
            epoch = self.current_epoch,
            scale = self.current_scale,
            "stability pool offset {} debt against {} coll",
            debt,
            coll
        );
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    fn sum_at(&self, epoch: u64, scale: u64) -> U256 {
        self.epoch_to_scale_to_sum
            .get(&epoch)
            .and_then(|scales| scales.get(&scale))
            .copied()
            .unwrap_or_default()
    }

    fn initial_deposit(&self, owner: &Address) -> U256 {
        self.deposits
            .get(owner)
            .map(|d| d.initial_value)
            .unwrap_or_default()
    }

    /// Current value of `owner`'s deposit after absorbed liquidations
    pub fn compounded_deposit(&self, owner: &Address) -> Result<U256> {
        let deposit = match self.deposits.get(owner) {
            Some(d) => d,
            None => return Ok(U256::zero()),
        };
        let snapshot = &deposit.snapshot;

        // Emptied in an earlier epoch
        if snapshot.epoch < self.current_epoch {
            return Ok(U256::zero());
        }

        let compounded = match self.current_scale.saturating_sub(snapshot.scale) {
            0 => mul_div(deposit.initial_value, self.p, snapshot.p)?,
            1 => mul_div(deposit.initial_value, self.p, snapshot.p)? / SP_SCALE_FACTOR,
            _ => U256::zero(),
        };

        // Below one billionth of the original the remainder is rounding noise
        if compounded < deposit.initial_value / U256::from(1_000_000_000u64) {
            return Ok(U256::zero());
        }
        Ok(compounded)
    }

    /// Collateral gain accrued by `owner` since the last change
    pub fn depositor_coll_gain(&self, owner: &Address) -> Result<U256> {
        let deposit = match self.deposits.get(owner) {
            Some(d) => d,
            None => return Ok(U256::zero()),
        };
        let snapshot = &deposit.snapshot;

        let first_portion = sub(self.sum_at(snapshot.epoch, snapshot.scale), snapshot.s)?;
        let second_portion = self.sum_at(snapshot.epoch, snapshot.scale + 1) / SP_SCALE_FACTOR;
        let gain = mul_div(
            deposit.initial_value,
            add(first_portion, second_portion)?,
            snapshot.p,
        )?;
        Ok(gain / DECIMAL_PRECISION)
    }

    /// Total USDD deposited
    pub fn total_deposits(&self) -> U256 {
        self.total_deposits
    }

    /// Total collateral held for depositors
    pub fn total_coll(&self) -> U256 {
        self.total_coll
    }

    /// Current product factor
    pub fn p(&self) -> U256 {
        self.p
    }

    /// Current epoch
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    /// Current scale
    pub fn current_scale(&self) -> u64 {
        self.current_scale
    }

    /// Deposit record of `owner`
    pub fn get_deposit(&self, owner: &Address) -> Option<&Deposit> {
        self.deposits.get(owner)
    }

    /// Number of depositors
    pub fn depositor_count(&self) -> usize {
        self.deposits.len()
    }

    /// Number of offsets absorbed
    pub fn total_offsets(&self) -> u64 {
        self.total_offsets
    }

    /// Compute state hash
    pub fn state_hash(&self) -> Hash {
        let mut data = Vec::new();
        let mut word = [0u8; 32];
        for value in [self.total_deposits, self.total_coll, self.p] {
            value.to_big_endian(&mut word);
            data.extend_from_slice(&word);
        }
        data.extend_from_slice(&self.current_epoch.to_be_bytes());
        data.extend_from_slice(&self.current_scale.to_be_bytes());
        Hash::sha256(&data)
    }
}

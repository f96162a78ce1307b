//! The trove ledger.
//!
//! [`TroveLedger`] owns every trove record and global aggregate and drives
//! them through open, adjust, close, liquidation and redemption. Prices,
//! token balances and the ordered position index are injected collaborators.
//!
//! # Atomicity
//!
//! Every operation runs against a clone of the committed [`SystemState`].
//! Token movements and index changes are staged alongside. Once every check
//! has passed, token debits are verified against current balances, the
//! staged changes are applied and the working state replaces the committed
//! one. Any `Err` leaves state, balances, index and event log untouched.

use primitive_types::U256;
use std::cmp::min;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::config::{ProtocolAddresses, ProtocolParams};
use crate::core::fees::{
    require_valid_max_fee_percentage, require_valid_redemption_max_fee, FeeState,
};
use crate::core::rewards::{EntireDebtAndColl, PendingRewards};
use crate::core::token::{InMemoryTokenLedger, TokenLedger};
use crate::core::trove::{Trove, TroveStatus};
use crate::error::{Error, Result};
use crate::liquidation::engine::{
    normal_mode_values, recovery_mode_values, LiquidationTotals, LiquidationValues,
};
use crate::liquidation::recovery::{
    check_potential_recovery_mode, describe_ratio, require_new_tcr_above_ccr,
    require_not_in_recovery_mode, require_tcr_above_mcr,
    require_valid_adjustment_in_current_mode, require_valid_open_in_current_mode, BalanceChange,
};
use crate::liquidation::sorted_troves::{PositionIndex, SortedTroves};
use crate::liquidation::stability_pool::StabilityPool;
use crate::oracle::price_feed::{FixedPriceFeed, PriceOracle};
use crate::protocol::events::{EventLog, ProtocolEvent, TroveOperation};
use crate::protocol::operations::{
    AdjustTroveOutcome, AdjustTroveParams, CloseTroveOutcome, Hints, LiquidationOutcome,
    OpenTroveOutcome, OpenTroveParams, OperationResult, ProtocolOperation, RedeemParams,
    RedemptionOutcome, StabilityPoolOutcome,
};
use crate::protocol::state::SystemState;
use crate::utils::constants::{DECIMAL_PRECISION, ONE_HUNDRED_PERCENT};
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::{add, compute_cr, compute_nominal_cr, format_wad, mul_div, sub};

// ═══════════════════════════════════════════════════════════════════════════════
// STAGED SIDE EFFECTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A debt token movement to perform on commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenMove {
    Mint { to: Address, amount: U256 },
    Burn { from: Address, amount: U256 },
    ToPool { from: Address, pool: Address, amount: U256 },
    FromPool { pool: Address, to: Address, amount: U256 },
}

impl TokenMove {
    fn debit(&self) -> Option<(Address, U256)> {
        match *self {
            Self::Mint { .. } => None,
            Self::Burn { from, amount } | Self::ToPool { from, amount, .. } => Some((from, amount)),
            Self::FromPool { pool, amount, .. } => Some((pool, amount)),
        }
    }

    fn credit(&self) -> Option<(Address, U256)> {
        match *self {
            Self::Mint { to, amount } | Self::FromPool { to, amount, .. } => Some((to, amount)),
            Self::ToPool { pool, amount, .. } => Some((pool, amount)),
            Self::Burn { .. } => None,
        }
    }

    fn apply<T: TokenLedger>(self, token: &mut T) -> Result<()> {
        match self {
            Self::Mint { to, amount } => token.mint(to, amount),
            Self::Burn { from, amount } => token.burn(from, amount),
            Self::ToPool { from, pool, amount } => token.send_to_pool(from, pool, amount),
            Self::FromPool { pool, to, amount } => token.return_from_pool(pool, to, amount),
        }
    }
}

/// A position index change to perform on commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexChange {
    Insert { id: Address, nicr: U256, hints: Hints },
    ReInsert { id: Address, nicr: U256, hints: Hints },
    Remove { id: Address },
}

impl IndexChange {
    fn check<I: PositionIndex>(&self, index: &I) -> Result<()> {
        match *self {
            Self::Insert { id, .. } if index.contains(&id) => Err(Error::PositionAlreadyActive(id)),
            Self::ReInsert { id, .. } | Self::Remove { id } if !index.contains(&id) => {
                Err(Error::PositionNotFound(id))
            }
            _ => Ok(()),
        }
    }

    fn apply<I: PositionIndex>(self, index: &mut I) -> Result<()> {
        match self {
            Self::Insert { id, nicr, hints } => index.insert(id, nicr, hints.prev, hints.next),
            Self::ReInsert { id, nicr, hints } => index.re_insert(id, nicr, hints.prev, hints.next),
            Self::Remove { id } => index.remove(&id),
        }
    }
}

/// Side effects of one operation, applied only on commit
#[derive(Debug, Default)]
struct Staged {
    tokens: Vec<TokenMove>,
    index: Vec<IndexChange>,
    events: Vec<ProtocolEvent>,
}

impl Staged {
    fn mint(&mut self, to: Address, amount: U256) {
        if !amount.is_zero() {
            self.tokens.push(TokenMove::Mint { to, amount });
        }
    }

    fn burn(&mut self, from: Address, amount: U256) {
        if !amount.is_zero() {
            self.tokens.push(TokenMove::Burn { from, amount });
        }
    }

    fn send_to_pool(&mut self, from: Address, pool: Address, amount: U256) {
        if !amount.is_zero() {
            self.tokens.push(TokenMove::ToPool { from, pool, amount });
        }
    }

    fn return_from_pool(&mut self, pool: Address, to: Address, amount: U256) {
        if !amount.is_zero() {
            self.tokens.push(TokenMove::FromPool { pool, to, amount });
        }
    }

    fn event(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }

    /// Verify every debit against balances, earlier moves included
    fn check_tokens<T: TokenLedger>(&self, token: &T) -> Result<()> {
        let mut balances: BTreeMap<Address, U256> = BTreeMap::new();
        for mv in &self.tokens {
            if let Some((account, amount)) = mv.debit() {
                let available = *balances
                    .entry(account)
                    .or_insert_with(|| token.balance_of(&account));
                if available < amount {
                    return Err(Error::InsufficientBalance {
                        required: amount,
                        available,
                    });
                }
                balances.insert(account, available - amount);
            }
            if let Some((account, amount)) = mv.credit() {
                let current = *balances
                    .entry(account)
                    .or_insert_with(|| token.balance_of(&account));
                balances.insert(account, add(current, amount)?);
            }
        }
        Ok(())
    }
}

/// Which troves a liquidation call considers
enum LiquidationTargets {
    /// Walk up from the lowest ratio, at most `n` troves
    Lowest(usize),
    /// An explicit list, skipping troves that cannot be liquidated
    Explicit(Vec<Address>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// TROVE LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Position state machine over injected price, token and index collaborators
#[derive(Debug)]
pub struct TroveLedger<O: PriceOracle, T: TokenLedger, I: PositionIndex> {
    params: ProtocolParams,
    addresses: ProtocolAddresses,
    state: SystemState,
    oracle: O,
    token: T,
    index: I,
    events: EventLog,
}

/// Ledger wired to the in-memory collaborators
pub type InMemoryTroveLedger = TroveLedger<FixedPriceFeed, InMemoryTokenLedger, SortedTroves>;

impl InMemoryTroveLedger {
    /// Ledger with a settable price, an in-memory USDD ledger and a sorted index
    pub fn in_memory(params: ProtocolParams, price: U256) -> Result<Self> {
        let addresses = ProtocolAddresses::default();
        let token = InMemoryTokenLedger::usdd(addresses.blacklist());
        let oracle = FixedPriceFeed::new(price);
        Self::new(params, addresses, oracle, token, SortedTroves::new())
    }

    /// Update the oracle price
    pub fn set_price(&mut self, price: U256) -> Result<()> {
        self.oracle.set_price(price)
    }
}

impl<O: PriceOracle, T: TokenLedger, I: PositionIndex> TroveLedger<O, T, I> {
    /// Create an empty ledger
    pub fn new(
        params: ProtocolParams,
        addresses: ProtocolAddresses,
        oracle: O,
        token: T,
        index: I,
    ) -> Result<Self> {
        params.validate()?;
        if !index.is_empty() {
            return Err(Error::InvalidParameter {
                name: "index".into(),
                reason: "a new ledger needs an empty position index".into(),
            });
        }
        Ok(Self {
            params,
            addresses,
            state: SystemState::new(),
            oracle,
            token,
            index,
            events: EventLog::new(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DISPATCH
    // ═══════════════════════════════════════════════════════════════════════════

    /// Execute a protocol operation
    pub fn execute(&mut self, op: ProtocolOperation) -> Result<OperationResult> {
        let operation = op.operation_type();
        let result = match op {
            ProtocolOperation::OpenTrove(p) => self.open_trove(p).map(OperationResult::OpenTrove),
            ProtocolOperation::AdjustTrove(p) => {
                self.adjust_trove(p).map(OperationResult::AdjustTrove)
            }
            ProtocolOperation::CloseTrove { borrower } => {
                self.close_trove(borrower).map(OperationResult::CloseTrove)
            }
            ProtocolOperation::ApplyPendingRewards { borrower } => self
                .apply_pending_rewards(borrower)
                .map(OperationResult::ApplyPendingRewards),
            ProtocolOperation::Liquidate { liquidator, target } => self
                .liquidate(liquidator, target)
                .map(OperationResult::Liquidation),
            ProtocolOperation::LiquidateTroves { liquidator, n } => self
                .liquidate_troves(liquidator, n)
                .map(OperationResult::Liquidation),
            ProtocolOperation::BatchLiquidate { liquidator, targets } => self
                .batch_liquidate(liquidator, targets)
                .map(OperationResult::Liquidation),
            ProtocolOperation::Redeem(p) => {
                self.redeem_collateral(p).map(OperationResult::Redemption)
            }
            ProtocolOperation::ClaimCollateral { borrower } => self
                .claim_collateral(borrower)
                .map(OperationResult::ClaimCollateral),
            ProtocolOperation::ProvideToStabilityPool { depositor, amount } => self
                .provide_to_stability_pool(depositor, amount)
                .map(OperationResult::StabilityPool),
            ProtocolOperation::WithdrawFromStabilityPool { depositor, amount } => self
                .withdraw_from_stability_pool(depositor, amount)
                .map(OperationResult::StabilityPool),
        };

        if let Err(e) = &result {
            debug!(operation, error = %e, "operation rejected");
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TROVE OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a trove for `op.borrower`
    pub fn open_trove(&mut self, op: OpenTroveParams) -> Result<OpenTroveOutcome> {
        let price = self.price()?;
        let borrower = op.borrower;
        let status = self.state.recovery_status(price, &self.params)?;
        let recovery = status.is_active;

        require_valid_max_fee_percentage(&self.params, op.max_fee_percentage, recovery)?;
        if self.state.status(&borrower).is_active() {
            return Err(Error::PositionAlreadyActive(borrower));
        }

        let mut next = self.state.clone();
        let mut staged = Staged::default();

        let mut net_debt = op.debt_amount;
        let mut fee = U256::zero();
        if !recovery {
            fee = self.trigger_borrowing_fee(
                &mut next,
                &mut staged,
                borrower,
                op.debt_amount,
                op.max_fee_percentage,
            )?;
            net_debt = add(net_debt, fee)?;
        }
        self.require_at_least_min_net_debt(net_debt)?;

        let composite_debt = add(net_debt, self.params.gas_compensation)?;
        let icr = compute_cr(op.coll_deposit, composite_debt, price)?;
        let nicr = compute_nominal_cr(op.coll_deposit, composite_debt)?;
        let change = BalanceChange {
            coll_change: op.coll_deposit,
            is_coll_increase: true,
            debt_change: composite_debt,
            is_debt_increase: true,
        };
        let new_tcr = change.new_tcr(status.system_coll, status.system_debt, price)?;
        require_valid_open_in_current_mode(recovery, icr, new_tcr, &self.params)?;

        next.insert_active_trove(borrower, op.coll_deposit, composite_debt)?;
        let stake = next.update_stake_and_total_stakes(&borrower)?;
        next.pools.active = next.pools.active.increased(op.coll_deposit, composite_debt)?;

        staged.index.push(IndexChange::Insert {
            id: borrower,
            nicr,
            hints: op.hints,
        });
        staged.mint(borrower, op.debt_amount);
        staged.mint(self.addresses.gas_pool, self.params.gas_compensation);
        staged.event(trove_updated(&next, borrower, TroveOperation::OpenTrove));
        staged.event(ProtocolEvent::TotalStakesUpdated {
            total_stakes: next.rewards.total_stakes,
        });

        self.commit(next, staged)?;
        debug!(
            borrower = %borrower,
            coll = %format_wad(op.coll_deposit),
            debt = %format_wad(composite_debt),
            icr = %describe_ratio(icr),
            "trove opened"
        );

        Ok(OpenTroveOutcome {
            coll: op.coll_deposit,
            debt: composite_debt,
            stake,
            fee,
            icr,
        })
    }

    /// Adjust collateral and debt of an active trove
    pub fn adjust_trove(&mut self, op: AdjustTroveParams) -> Result<AdjustTroveOutcome> {
        let price = self.price()?;
        let borrower = op.borrower;
        let status = self.state.recovery_status(price, &self.params)?;
        let recovery = status.is_active;

        if op.is_debt_increase {
            require_valid_max_fee_percentage(&self.params, op.max_fee_percentage, recovery)?;
            if op.debt_change.is_zero() {
                return Err(Error::InvalidOperation(
                    "debt increase requires a non-zero debt change".into(),
                ));
            }
        }
        if !op.coll_withdrawal.is_zero() && !op.coll_deposit.is_zero() {
            return Err(Error::InvalidOperation(
                "cannot withdraw and deposit collateral in one adjustment".into(),
            ));
        }
        if op.coll_withdrawal.is_zero() && op.coll_deposit.is_zero() && op.debt_change.is_zero() {
            return Err(Error::InvalidOperation(
                "adjustment must change collateral or debt".into(),
            ));
        }
        self.state.active_trove(&borrower)?;
        if !op.coll_withdrawal.is_zero() {
            require_not_in_recovery_mode(recovery, "collateral withdrawal")?;
        }

        let mut next = self.state.clone();
        let mut staged = Staged::default();
        let realized = next.apply_pending_rewards(&borrower)?;

        let (coll_change, is_coll_increase) = if op.coll_deposit.is_zero() {
            (op.coll_withdrawal, false)
        } else {
            (op.coll_deposit, true)
        };

        let mut net_debt_change = op.debt_change;
        let mut fee = U256::zero();
        if op.is_debt_increase && !recovery {
            fee = self.trigger_borrowing_fee(
                &mut next,
                &mut staged,
                borrower,
                op.debt_change,
                op.max_fee_percentage,
            )?;
            net_debt_change = add(net_debt_change, fee)?;
        }

        let trove = next.active_trove(&borrower)?.clone();
        if op.coll_withdrawal > trove.coll {
            return Err(Error::InvalidOperation(format!(
                "collateral withdrawal {} exceeds trove collateral {}",
                format_wad(op.coll_withdrawal),
                format_wad(trove.coll)
            )));
        }

        if !op.is_debt_increase && !op.debt_change.is_zero() {
            let net_debt = trove.net_debt(self.params.gas_compensation)?;
            if op.debt_change > net_debt {
                return Err(Error::InvalidOperation(format!(
                    "repayment {} exceeds net debt {}",
                    format_wad(op.debt_change),
                    format_wad(net_debt)
                )));
            }
            self.require_at_least_min_net_debt(net_debt - op.debt_change)?;
        }

        let change = BalanceChange {
            coll_change,
            is_coll_increase,
            debt_change: net_debt_change,
            is_debt_increase: op.is_debt_increase,
        };
        let old_icr = trove.icr(price)?;
        let new_icr = change.new_icr(trove.coll, trove.debt, price)?;
        let new_tcr = change.new_tcr(status.system_coll, status.system_debt, price)?;
        require_valid_adjustment_in_current_mode(
            recovery,
            op.coll_withdrawal,
            op.is_debt_increase,
            old_icr,
            new_icr,
            new_tcr,
            &self.params,
        )?;

        if !op.is_debt_increase && !op.debt_change.is_zero() {
            self.require_sufficient_balance(&borrower, op.debt_change)?;
        }

        let (new_coll, new_debt) = change.apply(trove.coll, trove.debt)?;
        next.update_trove_amounts(&borrower, new_coll, new_debt)?;
        let stake = next.update_stake_and_total_stakes(&borrower)?;
        let new_nicr = compute_nominal_cr(new_coll, new_debt)?;

        let active = if is_coll_increase {
            next.pools.active.increased(coll_change, U256::zero())?
        } else {
            next.pools.active.decreased(coll_change, U256::zero())?
        };
        next.pools.active = if op.is_debt_increase {
            active.increased(U256::zero(), net_debt_change)?
        } else {
            active.decreased(U256::zero(), net_debt_change)?
        };

        staged.index.push(IndexChange::ReInsert {
            id: borrower,
            nicr: new_nicr,
            hints: op.hints,
        });
        if op.is_debt_increase {
            staged.mint(borrower, op.debt_change);
        } else {
            staged.burn(borrower, op.debt_change);
        }
        staged.event(trove_updated(&next, borrower, TroveOperation::AdjustTrove));
        staged.event(ProtocolEvent::TotalStakesUpdated {
            total_stakes: next.rewards.total_stakes,
        });

        self.commit(next, staged)?;
        debug!(
            borrower = %borrower,
            coll = %format_wad(new_coll),
            debt = %format_wad(new_debt),
            icr = %describe_ratio(new_icr),
            "trove adjusted"
        );

        Ok(AdjustTroveOutcome {
            coll: new_coll,
            debt: new_debt,
            stake,
            fee,
            realized,
            coll_sent: op.coll_withdrawal,
        })
    }

    /// Deposit collateral
    pub fn add_coll(&mut self, borrower: Address, amount: U256, hints: Hints) -> Result<AdjustTroveOutcome> {
        self.adjust_trove(AdjustTroveParams::new(borrower).deposit_coll(amount).with_hints(hints))
    }

    /// Withdraw collateral
    pub fn withdraw_coll(&mut self, borrower: Address, amount: U256, hints: Hints) -> Result<AdjustTroveOutcome> {
        self.adjust_trove(AdjustTroveParams::new(borrower).withdraw_coll(amount).with_hints(hints))
    }

    /// Borrow more USDD
    pub fn withdraw_debt(
        &mut self,
        borrower: Address,
        amount: U256,
        max_fee_percentage: U256,
        hints: Hints,
    ) -> Result<AdjustTroveOutcome> {
        self.adjust_trove(
            AdjustTroveParams::new(borrower)
                .borrow(amount)
                .with_max_fee(max_fee_percentage)
                .with_hints(hints),
        )
    }

    /// Repay USDD
    pub fn repay_debt(&mut self, borrower: Address, amount: U256, hints: Hints) -> Result<AdjustTroveOutcome> {
        self.adjust_trove(AdjustTroveParams::new(borrower).repay(amount).with_hints(hints))
    }

    /// Repay the whole net debt and close the trove
    pub fn close_trove(&mut self, borrower: Address) -> Result<CloseTroveOutcome> {
        self.state.active_trove(&borrower)?;
        let price = self.price()?;
        let status = self.state.recovery_status(price, &self.params)?;
        require_not_in_recovery_mode(status.is_active, "closing a trove")?;

        let mut next = self.state.clone();
        let mut staged = Staged::default();
        next.apply_pending_rewards(&borrower)?;

        let trove = next.active_trove(&borrower)?.clone();
        let repayment = trove.net_debt(self.params.gas_compensation)?;
        self.require_sufficient_balance(&borrower, repayment)?;

        let change = BalanceChange {
            coll_change: trove.coll,
            is_coll_increase: false,
            debt_change: trove.debt,
            is_debt_increase: false,
        };
        let new_tcr = change.new_tcr(status.system_coll, status.system_debt, price)?;
        require_new_tcr_above_ccr(new_tcr, &self.params)?;

        next.remove_stake(&borrower)?;
        next.close_trove(&borrower, TroveStatus::ClosedByOwner)?;
        next.pools.active = next.pools.active.decreased(trove.coll, trove.debt)?;

        staged.index.push(IndexChange::Remove { id: borrower });
        staged.burn(borrower, repayment);
        staged.burn(self.addresses.gas_pool, self.params.gas_compensation);
        staged.event(trove_updated(&next, borrower, TroveOperation::CloseTrove));
        staged.event(ProtocolEvent::TotalStakesUpdated {
            total_stakes: next.rewards.total_stakes,
        });

        self.commit(next, staged)?;
        debug!(borrower = %borrower, coll = %format_wad(trove.coll), "trove closed");

        Ok(CloseTroveOutcome {
            repaid: repayment,
            coll_sent: trove.coll,
        })
    }

    /// Fold `borrower`'s pending redistribution rewards into the trove
    pub fn apply_pending_rewards(&mut self, borrower: Address) -> Result<PendingRewards> {
        self.state.active_trove(&borrower)?;
        let mut next = self.state.clone();
        let mut staged = Staged::default();

        let pending = next.apply_pending_rewards(&borrower)?;
        if !pending.is_zero() {
            staged.event(trove_updated(&next, borrower, TroveOperation::ApplyPendingRewards));
        }
        self.commit(next, staged)?;
        Ok(pending)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Liquidate one active trove
    pub fn liquidate(&mut self, liquidator: Address, target: Address) -> Result<LiquidationOutcome> {
        self.state.active_trove(&target)?;
        self.run_liquidation(liquidator, LiquidationTargets::Explicit(vec![target]))
    }

    /// Liquidate up to `n` troves starting from the lowest ratio
    pub fn liquidate_troves(&mut self, liquidator: Address, n: usize) -> Result<LiquidationOutcome> {
        self.run_liquidation(liquidator, LiquidationTargets::Lowest(n))
    }

    /// Liquidate every liquidatable trove in `targets`
    pub fn batch_liquidate(
        &mut self,
        liquidator: Address,
        targets: Vec<Address>,
    ) -> Result<LiquidationOutcome> {
        if targets.is_empty() {
            return Err(Error::InvalidOperation("batch liquidation needs targets".into()));
        }
        self.run_liquidation(liquidator, LiquidationTargets::Explicit(targets))
    }

    fn run_liquidation(
        &mut self,
        liquidator: Address,
        targets: LiquidationTargets,
    ) -> Result<LiquidationOutcome> {
        let price = self.price()?;
        let status = self.state.recovery_status(price, &self.params)?;
        let recovery_mode_at_start = status.is_active;

        let (candidates, explicit) = match targets {
            LiquidationTargets::Lowest(n) => (self.lowest_candidates(n, recovery_mode_at_start), false),
            LiquidationTargets::Explicit(list) => (list, true),
        };

        let mut next = self.state.clone();
        let mut staged = Staged::default();
        let mut totals = LiquidationTotals::default();
        let mut liquidated = Vec::new();

        let mut system_coll = status.system_coll;
        let mut system_debt = status.system_debt;
        let mut remaining_sp = next.stability_pool.total_deposits();
        let mut back_to_normal = !recovery_mode_at_start;

        for borrower in candidates {
            if !next.status(&borrower).is_active() {
                warn!(borrower = %borrower, "skipping liquidation of inactive trove");
                continue;
            }
            let entire = next.entire_debt_and_coll(&borrower)?;
            let icr = compute_cr(entire.coll, entire.debt, price)?;

            let values = if !back_to_normal {
                if icr >= self.params.mcr && remaining_sp.is_zero() {
                    if explicit {
                        warn!(borrower = %borrower, icr = %describe_ratio(icr), "skipping: stability pool empty");
                        continue;
                    }
                    break;
                }
                if next.trove_owners_count <= 1 {
                    warn!(borrower = %borrower, "skipping liquidation of the last trove");
                    continue;
                }
                let tcr = compute_cr(system_coll, system_debt, price)?;
                let values = match recovery_mode_values(
                    entire.debt,
                    entire.coll,
                    icr,
                    tcr,
                    price,
                    remaining_sp,
                    &self.params,
                )? {
                    Some(values) => values,
                    None => {
                        if explicit {
                            warn!(borrower = %borrower, icr = %describe_ratio(icr), "skipping: not liquidatable in Recovery Mode");
                        }
                        continue;
                    }
                };
                self.liquidate_position(
                    &mut next,
                    &mut staged,
                    borrower,
                    &entire,
                    &values,
                    TroveOperation::LiquidateInRecoveryMode,
                )?;

                system_debt = sub(system_debt, values.debt_to_offset)?;
                system_coll = sub(system_coll, values.coll_leaving_system()?)?;
                back_to_normal =
                    !check_potential_recovery_mode(system_coll, system_debt, price, &self.params)?;
                values
            } else if icr < self.params.mcr {
                let values = normal_mode_values(entire.debt, entire.coll, remaining_sp, &self.params)?;
                self.liquidate_position(
                    &mut next,
                    &mut staged,
                    borrower,
                    &entire,
                    &values,
                    TroveOperation::LiquidateInNormalMode,
                )?;
                values
            } else {
                if explicit {
                    warn!(borrower = %borrower, icr = %describe_ratio(icr), "skipping: ICR at or above MCR");
                    continue;
                }
                break;
            };

            remaining_sp = sub(remaining_sp, values.debt_to_offset)?;
            totals.add(&values)?;
            liquidated.push(borrower);
        }

        if totals.is_empty() {
            return Err(Error::NothingToLiquidate);
        }

        // Stability pool absorbs its share, the rest goes to the remaining troves
        if !totals.total_debt_to_offset.is_zero() {
            next.stability_pool
                .offset(totals.total_debt_to_offset, totals.total_coll_to_send_to_sp)?;
            next.pools.active = next
                .pools
                .active
                .decreased(totals.total_coll_to_send_to_sp, totals.total_debt_to_offset)?;
            staged.burn(self.addresses.stability_pool, totals.total_debt_to_offset);
        }
        if !totals.total_debt_to_redistribute.is_zero() {
            next.redistribute_debt_and_coll(
                totals.total_coll_to_redistribute,
                totals.total_debt_to_redistribute,
            )?;
            staged.event(ProtocolEvent::LTermsUpdated {
                l_coll: next.rewards.l_coll,
                l_debt: next.rewards.l_debt,
            });
        }
        next.pools.active = next
            .pools
            .active
            .decreased(totals.total_coll_surplus, U256::zero())?;

        next.update_system_snapshots(totals.total_coll_gas_compensation)?;
        next.pools.active = next
            .pools
            .active
            .decreased(totals.total_coll_gas_compensation, U256::zero())?;

        staged.return_from_pool(
            self.addresses.gas_pool,
            liquidator,
            totals.total_debt_gas_compensation,
        );
        staged.event(ProtocolEvent::Liquidation {
            liquidated_debt: totals.total_debt_in_sequence,
            liquidated_coll: totals.total_coll_in_sequence,
            coll_gas_compensation: totals.total_coll_gas_compensation,
            debt_gas_compensation: totals.total_debt_gas_compensation,
        });
        staged.event(ProtocolEvent::SystemSnapshotsUpdated {
            total_stakes_snapshot: next.rewards.total_stakes_snapshot,
            total_collateral_snapshot: next.rewards.total_collateral_snapshot,
        });
        staged.event(ProtocolEvent::TotalStakesUpdated {
            total_stakes: next.rewards.total_stakes,
        });

        self.commit(next, staged)?;
        info!(
            count = liquidated.len(),
            recovery_mode = recovery_mode_at_start,
            debt = %format_wad(totals.total_debt_in_sequence),
            coll = %format_wad(totals.total_coll_in_sequence),
            offset = %format_wad(totals.total_debt_to_offset),
            redistributed = %format_wad(totals.total_debt_to_redistribute),
            "liquidation"
        );

        Ok(LiquidationOutcome {
            liquidated,
            recovery_mode_at_start,
            coll_sent_to_liquidator: totals.total_coll_gas_compensation,
            debt_sent_to_liquidator: totals.total_debt_gas_compensation,
            totals,
        })
    }

    /// Up to `n` troves from the lowest ratio upwards; Recovery Mode never takes the highest
    fn lowest_candidates(&self, n: usize, exclude_first: bool) -> Vec<Address> {
        let first = self.index.first();
        let mut candidates = Vec::new();
        let mut cursor = self.index.last();
        while let Some(id) = cursor {
            if candidates.len() >= n || (exclude_first && Some(id) == first) {
                break;
            }
            candidates.push(id);
            cursor = self.index.prev(&id);
        }
        candidates
    }

    fn liquidate_position(
        &self,
        next: &mut SystemState,
        staged: &mut Staged,
        borrower: Address,
        entire: &EntireDebtAndColl,
        values: &LiquidationValues,
        operation: TroveOperation,
    ) -> Result<()> {
        next.move_pending_to_active(&entire.pending)?;
        next.remove_stake(&borrower)?;
        next.close_trove(&borrower, TroveStatus::ClosedByLiquidation)?;
        if !values.coll_surplus.is_zero() {
            next.pools.surplus.account_surplus(borrower, values.coll_surplus)?;
        }

        staged.index.push(IndexChange::Remove { id: borrower });
        staged.event(ProtocolEvent::TroveLiquidated {
            borrower,
            debt: entire.debt,
            coll: entire.coll,
            operation,
        });
        staged.event(trove_updated(next, borrower, operation));
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REDEMPTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Exchange USDD for collateral at face value, lowest-ratio troves first
    pub fn redeem_collateral(&mut self, op: RedeemParams) -> Result<RedemptionOutcome> {
        require_valid_redemption_max_fee(&self.params, op.max_fee_percentage)?;
        let price = self.price()?;
        let status = self.state.recovery_status(price, &self.params)?;
        require_tcr_above_mcr(status.tcr, &self.params)?;
        if op.amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        self.require_sufficient_balance(&op.redeemer, op.amount)?;

        let mut next = self.state.clone();
        let mut staged = Staged::default();

        let mut cursor = if self.is_valid_first_redemption_hint(op.first_hint, price)? {
            op.first_hint
        } else {
            let mut cursor = self.index.last();
            while let Some(id) = cursor {
                if self.state.current_icr(&id, price)? >= self.params.mcr {
                    break;
                }
                cursor = self.index.prev(&id);
            }
            cursor
        };

        let mut iterations_left = if op.max_iterations == 0 {
            usize::MAX
        } else {
            op.max_iterations
        };
        let mut remaining = op.amount;
        let mut redeemed_amount = U256::zero();
        let mut coll_drawn = U256::zero();
        let mut redeemed_from = Vec::new();
        let mut closed = Vec::new();

        while let Some(borrower) = cursor {
            if remaining.is_zero() || iterations_left == 0 {
                break;
            }
            iterations_left -= 1;
            let next_to_check = self.index.prev(&borrower);

            next.apply_pending_rewards(&borrower)?;
            let redeemed = self.redeem_from_trove(
                &mut next,
                &mut staged,
                borrower,
                remaining,
                price,
                op.partial_hint_nicr,
                op.hints,
            )?;
            let (debt_lot, coll_lot, was_closed) = match redeemed {
                Some(lot) => lot,
                None => break,
            };

            redeemed_amount = add(redeemed_amount, debt_lot)?;
            coll_drawn = add(coll_drawn, coll_lot)?;
            remaining = sub(remaining, debt_lot)?;
            redeemed_from.push(borrower);
            if was_closed {
                closed.push(borrower);
            }
            cursor = next_to_check;
        }

        if coll_drawn.is_zero() {
            return Err(Error::UnableToRedeem);
        }

        let quote = next.fees.quote_redemption(
            &self.params,
            next.timestamp,
            coll_drawn,
            price,
            status.system_debt,
            op.max_fee_percentage,
        )?;
        stage_fee_state(&mut next, &mut staged, quote.next_state);

        let coll_sent = sub(coll_drawn, quote.fee)?;
        next.pools.staking_coll = add(next.pools.staking_coll, quote.fee)?;
        next.pools.active = next.pools.active.decreased(coll_drawn, redeemed_amount)?;
        staged.burn(op.redeemer, redeemed_amount);
        staged.event(ProtocolEvent::Redemption {
            attempted_amount: op.amount,
            actual_amount: redeemed_amount,
            coll_sent: coll_drawn,
            coll_fee: quote.fee,
        });

        let base_rate = next.fees.base_rate;
        self.commit(next, staged)?;
        info!(
            redeemer = %op.redeemer,
            redeemed = %format_wad(redeemed_amount),
            coll = %format_wad(coll_drawn),
            fee = %format_wad(quote.fee),
            base_rate = %format_wad(base_rate),
            "redemption"
        );

        Ok(RedemptionOutcome {
            attempted_amount: op.amount,
            redeemed_amount,
            coll_drawn,
            coll_fee: quote.fee,
            coll_sent,
            redeemed_from,
            closed,
            base_rate,
        })
    }

    /// Redeem up to `max_amount` from one trove.
    ///
    /// Returns `(debt_lot, coll_lot, closed)`, or `None` when a partial
    /// redemption was cancelled.
    #[allow(clippy::too_many_arguments)]
    fn redeem_from_trove(
        &self,
        next: &mut SystemState,
        staged: &mut Staged,
        borrower: Address,
        max_amount: U256,
        price: U256,
        partial_hint_nicr: Option<U256>,
        hints: Hints,
    ) -> Result<Option<(U256, U256, bool)>> {
        let gas_compensation = self.params.gas_compensation;
        let trove = next.active_trove(&borrower)?.clone();

        let debt_lot = min(max_amount, trove.net_debt(gas_compensation)?);
        let coll_lot = mul_div(debt_lot, DECIMAL_PRECISION, price)?;
        let new_debt = sub(trove.debt, debt_lot)?;
        let new_coll = sub(trove.coll, coll_lot)?;

        if new_debt == gas_compensation {
            next.remove_stake(&borrower)?;
            next.close_trove(&borrower, TroveStatus::ClosedByRedemption)?;
            next.pools.active = next.pools.active.decreased(new_coll, gas_compensation)?;
            if !new_coll.is_zero() {
                next.pools.surplus.account_surplus(borrower, new_coll)?;
            }

            staged.index.push(IndexChange::Remove { id: borrower });
            staged.burn(self.addresses.gas_pool, gas_compensation);
            staged.event(trove_updated(next, borrower, TroveOperation::RedeemCollateral));
            return Ok(Some((debt_lot, coll_lot, true)));
        }

        let new_nicr = compute_nominal_cr(new_coll, new_debt)?;
        let hint_mismatch = partial_hint_nicr.map_or(false, |hint| hint != new_nicr);
        if hint_mismatch || sub(new_debt, gas_compensation)? < self.params.min_net_debt {
            debug!(borrower = %borrower, "partial redemption cancelled");
            return Ok(None);
        }

        next.update_trove_amounts(&borrower, new_coll, new_debt)?;
        next.update_stake_and_total_stakes(&borrower)?;
        staged.index.push(IndexChange::ReInsert {
            id: borrower,
            nicr: new_nicr,
            hints,
        });
        staged.event(trove_updated(next, borrower, TroveOperation::RedeemCollateral));
        Ok(Some((debt_lot, coll_lot, false)))
    }

    fn is_valid_first_redemption_hint(&self, hint: Option<Address>, price: U256) -> Result<bool> {
        let hint = match hint {
            Some(hint) if self.index.contains(&hint) => hint,
            _ => return Ok(false),
        };
        if self.state.current_icr(&hint, price)? < self.params.mcr {
            return Ok(false);
        }
        match self.index.next(&hint) {
            None => Ok(true),
            Some(lower) => Ok(self.state.current_icr(&lower, price)? < self.params.mcr),
        }
    }

    /// Pay out `borrower`'s surplus collateral
    pub fn claim_collateral(&mut self, borrower: Address) -> Result<U256> {
        let mut next = self.state.clone();
        let mut staged = Staged::default();

        let amount = next.pools.surplus.claim(&borrower)?;
        staged.event(ProtocolEvent::CollateralClaimed { borrower, amount });

        self.commit(next, staged)?;
        debug!(borrower = %borrower, amount = %format_wad(amount), "surplus collateral claimed");
        Ok(amount)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STABILITY POOL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit USDD into the stability pool, paying out accrued collateral gains
    pub fn provide_to_stability_pool(
        &mut self,
        depositor: Address,
        amount: U256,
    ) -> Result<StabilityPoolOutcome> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        let mut next = self.state.clone();
        let mut staged = Staged::default();

        let change = next.stability_pool.deposit(depositor, amount)?;
        staged.send_to_pool(depositor, self.addresses.stability_pool, amount);
        staged.event(ProtocolEvent::StabilityPoolDepositChanged {
            depositor,
            new_deposit: change.new_deposit,
            coll_gain: change.coll_gain,
        });

        self.commit(next, staged)?;
        debug!(depositor = %depositor, deposit = %format_wad(change.new_deposit), "stability deposit");
        Ok(StabilityPoolOutcome { depositor, change })
    }

    /// Withdraw up to `amount` from the stability pool. Zero claims gains only.
    pub fn withdraw_from_stability_pool(
        &mut self,
        depositor: Address,
        amount: U256,
    ) -> Result<StabilityPoolOutcome> {
        if !amount.is_zero() {
            self.require_no_undercollateralized_troves()?;
        }
        let mut next = self.state.clone();
        let mut staged = Staged::default();

        let change = next.stability_pool.withdraw(&depositor, amount)?;
        staged.return_from_pool(self.addresses.stability_pool, depositor, change.withdrawn);
        staged.event(ProtocolEvent::StabilityPoolDepositChanged {
            depositor,
            new_deposit: change.new_deposit,
            coll_gain: change.coll_gain,
        });

        self.commit(next, staged)?;
        debug!(depositor = %depositor, withdrawn = %format_wad(change.withdrawn), "stability withdrawal");
        Ok(StabilityPoolOutcome { depositor, change })
    }

    fn require_no_undercollateralized_troves(&self) -> Result<()> {
        if let Some(lowest) = self.index.last() {
            let price = self.price()?;
            if self.state.current_icr(&lowest, price)? < self.params.mcr {
                return Err(Error::UndercollateralizedPositions);
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TIME
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move the ledger clock to `timestamp` (never backwards)
    pub fn set_timestamp(&mut self, timestamp: u64) -> Result<()> {
        if timestamp < self.state.timestamp {
            return Err(Error::InvalidParameter {
                name: "timestamp".into(),
                reason: format!("{} is before current time {}", timestamp, self.state.timestamp),
            });
        }
        self.state.timestamp = timestamp;
        Ok(())
    }

    /// Advance the ledger clock by `seconds`
    pub fn advance_time(&mut self, seconds: u64) -> Result<()> {
        let timestamp = self
            .state
            .timestamp
            .checked_add(seconds)
            .ok_or_else(|| Error::Overflow {
                operation: "advance_time".into(),
            })?;
        self.set_timestamp(timestamp)
    }

    /// Replace the fee state, for simulations starting from a known base rate
    pub fn seed_fee_state(&mut self, base_rate: U256, last_fee_operation_time: u64) -> Result<()> {
        if base_rate > ONE_HUNDRED_PERCENT {
            return Err(Error::InvalidParameter {
                name: "base_rate".into(),
                reason: "must not exceed 100%".into(),
            });
        }
        self.state.fees = FeeState::new(base_rate, last_fee_operation_time);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Trove record of `borrower`
    pub fn get_trove(&self, borrower: &Address) -> Option<&Trove> {
        self.state.trove(borrower)
    }

    /// Status of `borrower`'s trove
    pub fn trove_status(&self, borrower: &Address) -> TroveStatus {
        self.state.status(borrower)
    }

    /// Recorded values plus pending rewards
    pub fn get_entire_debt_and_coll(&self, borrower: &Address) -> Result<EntireDebtAndColl> {
        self.state.entire_debt_and_coll(borrower)
    }

    /// ICR including pending rewards at the oracle price
    pub fn get_current_icr(&self, borrower: &Address) -> Result<U256> {
        self.state.current_icr(borrower, self.price()?)
    }

    /// Nominal ratio including pending rewards
    pub fn get_nominal_icr(&self, borrower: &Address) -> Result<U256> {
        self.state.nominal_icr(borrower)
    }

    /// Total collateralization ratio at the oracle price
    pub fn get_tcr(&self) -> Result<U256> {
        self.state.tcr(self.price()?)
    }

    /// Whether TCR < CCR at the oracle price
    pub fn check_recovery_mode(&self) -> Result<bool> {
        self.state.is_recovery_mode(self.price()?, &self.params)
    }

    /// Borrowing rate with decay applied
    pub fn get_borrowing_rate(&self) -> Result<U256> {
        self.state.fees.borrowing_rate(&self.params, self.state.timestamp)
    }

    /// Borrowing fee on `debt` with decay applied
    pub fn get_borrowing_fee(&self, debt: U256) -> Result<U256> {
        self.state.fees.borrowing_fee(&self.params, self.state.timestamp, debt)
    }

    /// Redemption rate with decay applied
    pub fn get_redemption_rate(&self) -> Result<U256> {
        self.state.fees.redemption_rate(&self.params, self.state.timestamp)
    }

    /// Pending collateral reward (zero for inactive troves)
    pub fn get_pending_coll_reward(&self, borrower: &Address) -> Result<U256> {
        match self.state.active_trove(borrower) {
            Ok(trove) => self.state.rewards.pending_coll(trove),
            Err(_) => Ok(U256::zero()),
        }
    }

    /// Pending debt reward (zero for inactive troves)
    pub fn get_pending_debt_reward(&self, borrower: &Address) -> Result<U256> {
        match self.state.active_trove(borrower) {
            Ok(trove) => self.state.rewards.pending_debt(trove),
            Err(_) => Ok(U256::zero()),
        }
    }

    /// Whether `borrower` has missed a redistribution
    pub fn has_pending_rewards(&self, borrower: &Address) -> bool {
        self.state
            .active_trove(borrower)
            .map_or(false, |t| self.state.rewards.has_pending_rewards(t))
    }

    /// Number of active troves
    pub fn trove_owners_count(&self) -> u64 {
        self.state.trove_owners_count
    }

    /// Active plus default collateral
    pub fn entire_system_coll(&self) -> Result<U256> {
        self.state.entire_system_coll()
    }

    /// Active plus default debt
    pub fn entire_system_debt(&self) -> Result<U256> {
        self.state.entire_system_debt()
    }

    /// Claimable surplus collateral of `borrower`
    pub fn coll_surplus(&self, borrower: &Address) -> U256 {
        self.state.pools.surplus.claimable(borrower)
    }

    /// Current base rate (without decay)
    pub fn base_rate(&self) -> U256 {
        self.state.fees.base_rate
    }

    /// Time of the last decay-clock update
    pub fn last_fee_operation_time(&self) -> u64 {
        self.state.fees.last_fee_operation_time
    }

    /// Ledger clock
    pub fn timestamp(&self) -> u64 {
        self.state.timestamp
    }

    /// Stability pool
    pub fn stability_pool(&self) -> &StabilityPool {
        &self.state.stability_pool
    }

    /// Committed state
    pub fn state(&self) -> &SystemState {
        &self.state
    }

    /// Hash of the committed state
    pub fn state_hash(&self) -> Result<Hash> {
        self.state.state_hash()
    }

    /// Protocol parameters
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// Protocol-internal addresses
    pub fn addresses(&self) -> &ProtocolAddresses {
        &self.addresses
    }

    /// Committed events
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Price oracle
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Mutable price oracle
    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// Debt token ledger
    pub fn token(&self) -> &T {
        &self.token
    }

    /// Mutable debt token ledger, for user-to-user transfers
    pub fn token_mut(&mut self) -> &mut T {
        &mut self.token
    }

    /// Position index
    pub fn index(&self) -> &I {
        &self.index
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    fn price(&self) -> Result<U256> {
        let price = self.oracle.current_price();
        if price.is_zero() {
            return Err(Error::InvalidParameter {
                name: "price".into(),
                reason: "oracle returned zero".into(),
            });
        }
        Ok(price)
    }

    fn require_at_least_min_net_debt(&self, net_debt: U256) -> Result<()> {
        if net_debt < self.params.min_net_debt {
            return Err(Error::DebtFloorViolation {
                net_debt,
                minimum: self.params.min_net_debt,
            });
        }
        Ok(())
    }

    fn require_sufficient_balance(&self, account: &Address, required: U256) -> Result<()> {
        let available = self.token.balance_of(account);
        if available < required {
            return Err(Error::InsufficientBalance {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Decay the base rate and stage the borrowing fee on `amount`
    fn trigger_borrowing_fee(
        &self,
        next: &mut SystemState,
        staged: &mut Staged,
        borrower: Address,
        amount: U256,
        max_fee_percentage: U256,
    ) -> Result<U256> {
        let quote = next
            .fees
            .quote_borrowing(&self.params, next.timestamp, amount, max_fee_percentage)?;
        stage_fee_state(next, staged, quote.next_state);
        staged.mint(self.addresses.staking, quote.fee);
        if !quote.fee.is_zero() {
            staged.event(ProtocolEvent::BorrowingFeePaid {
                borrower,
                fee: quote.fee,
            });
        }
        Ok(quote.fee)
    }

    /// Check staged debits, apply index and token changes, then swap in `next`
    fn commit(&mut self, next: SystemState, staged: Staged) -> Result<()> {
        staged.check_tokens(&self.token)?;
        for change in &staged.index {
            change.check(&self.index)?;
        }

        for change in staged.index {
            change.apply(&mut self.index)?;
        }
        for mv in staged.tokens {
            mv.apply(&mut self.token)?;
        }

        let timestamp = next.timestamp;
        self.state = next;
        self.events.extend(timestamp, staged.events);
        Ok(())
    }
}

/// Commit a new fee state into `next`, staging the matching events
fn stage_fee_state(next: &mut SystemState, staged: &mut Staged, fees: FeeState) {
    let previous = next.fees;
    next.fees = fees;
    staged.event(ProtocolEvent::BaseRateUpdated {
        base_rate: fees.base_rate,
    });
    if fees.last_fee_operation_time != previous.last_fee_operation_time {
        staged.event(ProtocolEvent::LastFeeOpTimeUpdated {
            timestamp: fees.last_fee_operation_time,
        });
    }
    if fees.base_rate != previous.base_rate {
        info!(base_rate = %format_wad(fees.base_rate), "base rate updated");
    }
}

fn trove_updated(state: &SystemState, borrower: Address, operation: TroveOperation) -> ProtocolEvent {
    let (debt, coll, stake) = state
        .trove(&borrower)
        .map(|t| (t.debt, t.coll, t.stake))
        .unwrap_or_default();
    ProtocolEvent::TroveUpdated {
        borrower,
        debt,
        coll,
        stake,
        operation,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::math::{dec, to_wad};

    fn params() -> ProtocolParams {
        ProtocolParams::default()
            .with_gas_compensation(to_wad(10))
            .with_min_net_debt(to_wad(50))
    }

    fn ledger() -> InMemoryTroveLedger {
        InMemoryTroveLedger::in_memory(params(), to_wad(200)).unwrap()
    }

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    fn open(ledger: &mut InMemoryTroveLedger, label: &str, coll: u64, debt: u64) -> OpenTroveOutcome {
        ledger
            .open_trove(OpenTroveParams::new(addr(label), to_wad(coll), to_wad(debt)))
            .unwrap()
    }

    #[test]
    fn test_open_trove_records_position() {
        let mut ledger = ledger();
        let outcome = open(&mut ledger, "alice", 2, 100);

        // 100 + 0.5% fee + 10 gas compensation
        assert_eq!(outcome.fee, dec(5, 17));
        assert_eq!(outcome.debt, dec(1105, 17));
        assert_eq!(outcome.stake, to_wad(2));

        assert!(ledger.index().contains(&addr("alice")));
        assert_eq!(ledger.token().balance_of(&addr("alice")), to_wad(100));
        assert_eq!(ledger.token().balance_of(&ledger.addresses().gas_pool), to_wad(10));
        assert_eq!(ledger.token().balance_of(&ledger.addresses().staking), dec(5, 17));
        assert_eq!(ledger.trove_owners_count(), 1);
        assert!(ledger.state().verify_invariants().is_ok());
    }

    #[test]
    fn test_open_twice_rejected() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 2, 100);
        let err = ledger
            .open_trove(OpenTroveParams::new(addr("alice"), to_wad(2), to_wad(100)))
            .unwrap_err();
        assert_eq!(err, Error::PositionAlreadyActive(addr("alice")));
    }

    #[test]
    fn test_open_below_min_debt_rejected() {
        let mut ledger = ledger();
        let err = ledger
            .open_trove(OpenTroveParams::new(addr("alice"), to_wad(2), to_wad(40)))
            .unwrap_err();
        assert!(matches!(err, Error::DebtFloorViolation { .. }));
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn test_adjust_rejects_malformed_requests() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 2, 100);
        let who = addr("alice");

        let both = AdjustTroveParams::new(who).deposit_coll(to_wad(1)).withdraw_coll(to_wad(1));
        assert!(matches!(ledger.adjust_trove(both), Err(Error::InvalidOperation(_))));

        let nothing = AdjustTroveParams::new(who);
        assert!(matches!(ledger.adjust_trove(nothing), Err(Error::InvalidOperation(_))));

        let zero_borrow = AdjustTroveParams::new(who).borrow(U256::zero());
        assert!(matches!(ledger.adjust_trove(zero_borrow), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_adjust_borrow_and_repay() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 2, 100);
        let who = addr("alice");

        let outcome = ledger
            .withdraw_debt(who, to_wad(50), ONE_HUNDRED_PERCENT, Hints::none())
            .unwrap();
        assert_eq!(outcome.fee, dec(25, 16));
        assert_eq!(ledger.token().balance_of(&who), to_wad(150));

        ledger.repay_debt(who, to_wad(20), Hints::none()).unwrap();
        assert_eq!(ledger.token().balance_of(&who), to_wad(130));

        // Repaying below the floor is refused
        let err = ledger.repay_debt(who, to_wad(100), Hints::none()).unwrap_err();
        assert!(matches!(err, Error::DebtFloorViolation { .. }));
    }

    #[test]
    fn test_withdraw_coll_below_mcr_rejected() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 10, 100);
        open(&mut ledger, "bob", 2, 100);
        let before = ledger.state().to_bytes().unwrap();

        // 0.6 coll at $200 against 110.5 debt is ~108%
        let err = ledger
            .withdraw_coll(addr("bob"), dec(14, 17), Hints::none())
            .unwrap_err();
        assert!(matches!(err, Error::CollateralizationViolation { .. }));
        assert_eq!(ledger.state().to_bytes().unwrap(), before);
    }

    #[test]
    fn test_close_requires_second_trove() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 2, 100);
        // Alice holds 100 but owes 100.5 net
        ledger.token_mut().mint(addr("alice"), to_wad(1)).unwrap();
        assert_eq!(ledger.close_trove(addr("alice")), Err(Error::LastPositionRestriction));

        open(&mut ledger, "bob", 2, 100);
        let outcome = ledger.close_trove(addr("alice")).unwrap();
        assert_eq!(outcome.coll_sent, to_wad(2));
        assert_eq!(outcome.repaid, dec(1005, 17));
        assert_eq!(ledger.trove_status(&addr("alice")), TroveStatus::ClosedByOwner);
        assert!(!ledger.index().contains(&addr("alice")));
    }

    #[test]
    fn test_liquidation_redistributes_without_stability_pool() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 10, 100);
        open(&mut ledger, "bob", 10, 100);
        open(&mut ledger, "carol", 1, 100);

        ledger.set_price(to_wad(100)).unwrap();
        let outcome = ledger.liquidate(addr("liquidator"), addr("carol")).unwrap();

        assert_eq!(outcome.liquidated, vec![addr("carol")]);
        assert_eq!(outcome.coll_sent_to_liquidator, dec(5, 15));
        assert_eq!(ledger.token().balance_of(&addr("liquidator")), to_wad(10));
        assert!(ledger.has_pending_rewards(&addr("alice")));
        assert_eq!(
            ledger.trove_status(&addr("carol")),
            TroveStatus::ClosedByLiquidation
        );
        assert!(ledger.state().verify_invariants().is_ok());
    }

    #[test]
    fn test_liquidate_healthy_trove_rejected() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 10, 100);
        open(&mut ledger, "bob", 10, 100);
        assert_eq!(
            ledger.liquidate(addr("liq"), addr("bob")),
            Err(Error::NothingToLiquidate)
        );
        assert!(matches!(
            ledger.liquidate(addr("liq"), addr("nobody")),
            Err(Error::PositionNotFound(_))
        ));
    }

    #[test]
    fn test_stability_pool_offset() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 100, 1_000);
        open(&mut ledger, "bob", 1, 100);
        ledger.provide_to_stability_pool(addr("alice"), to_wad(500)).unwrap();

        // Bob at ~104%, the system stays far above CCR
        ledger.set_price(to_wad(115)).unwrap();
        assert!(!ledger.check_recovery_mode().unwrap());
        let outcome = ledger.liquidate_troves(addr("liq"), 10).unwrap();
        assert_eq!(outcome.liquidated, vec![addr("bob")]);
        assert_eq!(outcome.totals.total_debt_to_redistribute, U256::zero());

        let debt = outcome.totals.total_debt_to_offset;
        assert_eq!(ledger.stability_pool().total_deposits(), to_wad(500) - debt);
        assert_eq!(
            ledger.token().balance_of(&ledger.addresses().stability_pool),
            to_wad(500) - debt
        );

        // A withdrawal pays out the collateral gain
        let change = ledger
            .withdraw_from_stability_pool(addr("alice"), U256::zero())
            .unwrap()
            .change;
        assert!(!change.coll_gain.is_zero());
    }

    #[test]
    fn test_redemption_burns_and_charges_fee() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 10, 1_000);
        open(&mut ledger, "bob", 1, 100);

        let supply_before = ledger.token().total_supply();
        let outcome = ledger
            .redeem_collateral(RedeemParams::new(addr("alice"), to_wad(50)))
            .unwrap();

        assert_eq!(outcome.redeemed_amount, to_wad(50));
        assert_eq!(outcome.redeemed_from, vec![addr("bob")]);
        assert_eq!(outcome.coll_drawn, dec(25, 16));
        assert!(outcome.coll_fee > U256::zero());
        assert_eq!(ledger.token().total_supply(), supply_before - to_wad(50));
        assert!(ledger.base_rate() > U256::zero());
    }

    #[test]
    fn test_redemption_closing_trove_leaves_surplus() {
        let mut ledger = ledger();
        open(&mut ledger, "alice", 10, 1_000);
        open(&mut ledger, "bob", 1, 100);

        // Bob's net debt is 100.5
        let outcome = ledger
            .redeem_collateral(RedeemParams::new(addr("alice"), dec(1005, 17)))
            .unwrap();
        assert_eq!(outcome.closed, vec![addr("bob")]);
        assert_eq!(ledger.trove_status(&addr("bob")), TroveStatus::ClosedByRedemption);

        let surplus = ledger.coll_surplus(&addr("bob"));
        assert_eq!(surplus, to_wad(1) - dec(5025, 14));
        assert_eq!(ledger.claim_collateral(addr("bob")).unwrap(), surplus);
        assert_eq!(
            ledger.claim_collateral(addr("bob")),
            Err(Error::NoCollateralToClaim(addr("bob")))
        );
    }

    #[test]
    fn test_time_controls() {
        let mut ledger = ledger();
        ledger.set_timestamp(100).unwrap();
        ledger.advance_time(60).unwrap();
        assert_eq!(ledger.timestamp(), 160);
        assert!(ledger.set_timestamp(10).is_err());
    }

    #[test]
    fn test_execute_dispatch() {
        let mut ledger = ledger();
        let result = ledger
            .execute(ProtocolOperation::OpenTrove(OpenTroveParams::new(
                addr("alice"),
                to_wad(2),
                to_wad(100),
            )))
            .unwrap();
        assert!(matches!(result, OperationResult::OpenTrove(_)));

        let result = ledger.execute(ProtocolOperation::CloseTrove { borrower: addr("nobody") });
        assert!(matches!(result, Err(Error::PositionNotFound(_))));
    }
}

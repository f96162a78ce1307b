//! Protocol operations - requests and their outcomes.
//!
//! Each request struct describes one atomic call into the
//! [`TroveLedger`](crate::protocol::TroveLedger). Requests can be built
//! fluently and dispatched either through the dedicated ledger method or
//! through [`ProtocolOperation`] and `TroveLedger::execute`.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::rewards::PendingRewards;
use crate::liquidation::engine::LiquidationTotals;
use crate::liquidation::stability_pool::DepositChange;
use crate::utils::constants::ONE_HUNDRED_PERCENT;
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// HINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Neighbours suggested for re-inserting a trove into the position index.
///
/// Hints only speed up the search; a stale or wrong hint is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hints {
    /// Suggested neighbour with a higher nominal ratio
    pub prev: Option<Address>,
    /// Suggested neighbour with a lower nominal ratio
    pub next: Option<Address>,
}

impl Hints {
    /// No hints
    pub fn none() -> Self {
        Self::default()
    }

    /// Both neighbours
    pub fn new(prev: Option<Address>, next: Option<Address>) -> Self {
        Self { prev, next }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TROVE REQUESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Open a trove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTroveParams {
    /// Owner of the new trove
    pub borrower: Address,
    /// Collateral deposited
    pub coll_deposit: U256,
    /// USDD requested (fee and gas compensation are added on top)
    pub debt_amount: U256,
    /// Highest acceptable borrowing rate
    pub max_fee_percentage: U256,
    /// Index hints
    pub hints: Hints,
}

impl OpenTroveParams {
    /// Open with no fee limit below 100% and no hints
    pub fn new(borrower: Address, coll_deposit: U256, debt_amount: U256) -> Self {
        Self {
            borrower,
            coll_deposit,
            debt_amount,
            max_fee_percentage: ONE_HUNDRED_PERCENT,
            hints: Hints::none(),
        }
    }

    /// Set the highest acceptable borrowing rate
    pub fn with_max_fee(mut self, max_fee_percentage: U256) -> Self {
        self.max_fee_percentage = max_fee_percentage;
        self
    }

    /// Set index hints
    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }
}

/// Adjust an active trove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustTroveParams {
    /// Owner of the trove
    pub borrower: Address,
    /// Collateral to withdraw
    pub coll_withdrawal: U256,
    /// Collateral to deposit
    pub coll_deposit: U256,
    /// USDD to borrow or repay
    pub debt_change: U256,
    /// Whether `debt_change` is borrowed
    pub is_debt_increase: bool,
    /// Highest acceptable borrowing rate (debt increases only)
    pub max_fee_percentage: U256,
    /// Index hints
    pub hints: Hints,
}

impl AdjustTroveParams {
    /// An adjustment with every delta zero
    pub fn new(borrower: Address) -> Self {
        Self {
            borrower,
            coll_withdrawal: U256::zero(),
            coll_deposit: U256::zero(),
            debt_change: U256::zero(),
            is_debt_increase: false,
            max_fee_percentage: ONE_HUNDRED_PERCENT,
            hints: Hints::none(),
        }
    }

    /// Deposit collateral
    pub fn deposit_coll(mut self, amount: U256) -> Self {
        self.coll_deposit = amount;
        self
    }

    /// Withdraw collateral
    pub fn withdraw_coll(mut self, amount: U256) -> Self {
        self.coll_withdrawal = amount;
        self
    }

    /// Borrow more USDD
    pub fn borrow(mut self, amount: U256) -> Self {
        self.debt_change = amount;
        self.is_debt_increase = true;
        self
    }

    /// Repay USDD
    pub fn repay(mut self, amount: U256) -> Self {
        self.debt_change = amount;
        self.is_debt_increase = false;
        self
    }

    /// Set the highest acceptable borrowing rate
    pub fn with_max_fee(mut self, max_fee_percentage: U256) -> Self {
        self.max_fee_percentage = max_fee_percentage;
        self
    }

    /// Set index hints
    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }
}

/// Redeem USDD for collateral from the lowest-ratio troves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemParams {
    /// Holder redeeming USDD
    pub redeemer: Address,
    /// USDD to redeem
    pub amount: U256,
    /// First trove to redeem from, if it is the lowest one at or above MCR
    pub first_hint: Option<Address>,
    /// Expected nominal ratio of the last, partially redeemed trove
    pub partial_hint_nicr: Option<U256>,
    /// Index hints for the partially redeemed trove
    pub hints: Hints,
    /// Troves to visit at most (0 = unbounded)
    pub max_iterations: usize,
    /// Highest acceptable redemption rate
    pub max_fee_percentage: U256,
}

impl RedeemParams {
    /// Unbounded redemption with a 100% fee limit
    pub fn new(redeemer: Address, amount: U256) -> Self {
        Self {
            redeemer,
            amount,
            first_hint: None,
            partial_hint_nicr: None,
            hints: Hints::none(),
            max_iterations: 0,
            max_fee_percentage: ONE_HUNDRED_PERCENT,
        }
    }

    /// Set the first trove hint
    pub fn with_first_hint(mut self, hint: Address) -> Self {
        self.first_hint = Some(hint);
        self
    }

    /// Require the partially redeemed trove to end at `nicr`
    pub fn with_partial_hint(mut self, nicr: U256, hints: Hints) -> Self {
        self.partial_hint_nicr = Some(nicr);
        self.hints = hints;
        self
    }

    /// Visit at most `n` troves
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Set the highest acceptable redemption rate
    pub fn with_max_fee(mut self, max_fee_percentage: U256) -> Self {
        self.max_fee_percentage = max_fee_percentage;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of opening a trove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTroveOutcome {
    /// Recorded collateral
    pub coll: U256,
    /// Recorded debt (requested + fee + gas compensation)
    pub debt: U256,
    /// Stake
    pub stake: U256,
    /// Borrowing fee charged
    pub fee: U256,
    /// Individual collateral ratio
    pub icr: U256,
}

/// Result of adjusting a trove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustTroveOutcome {
    /// Recorded collateral after the adjustment
    pub coll: U256,
    /// Recorded debt after the adjustment
    pub debt: U256,
    /// Stake after the adjustment
    pub stake: U256,
    /// Borrowing fee charged
    pub fee: U256,
    /// Pending rewards realized before the adjustment
    pub realized: PendingRewards,
    /// Collateral returned to the borrower
    pub coll_sent: U256,
}

/// Result of closing a trove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseTroveOutcome {
    /// USDD burned from the borrower
    pub repaid: U256,
    /// Collateral returned to the borrower
    pub coll_sent: U256,
}

/// Result of a liquidation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    /// Troves liquidated, in order
    pub liquidated: Vec<Address>,
    /// Whether the call started in Recovery Mode
    pub recovery_mode_at_start: bool,
    /// Summed values
    pub totals: LiquidationTotals,
    /// Collateral paid to the liquidator
    pub coll_sent_to_liquidator: U256,
    /// USDD paid to the liquidator from the gas pool
    pub debt_sent_to_liquidator: U256,
}

/// Result of a redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    /// USDD the redeemer asked for
    pub attempted_amount: U256,
    /// USDD actually redeemed and burned
    pub redeemed_amount: U256,
    /// Collateral drawn from troves
    pub coll_drawn: U256,
    /// Collateral kept as fee
    pub coll_fee: U256,
    /// Collateral sent to the redeemer
    pub coll_sent: U256,
    /// Troves redeemed against, in order
    pub redeemed_from: Vec<Address>,
    /// Troves closed by the redemption
    pub closed: Vec<Address>,
    /// Base rate after the redemption
    pub base_rate: U256,
}

/// Result of a stability pool deposit or withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPoolOutcome {
    /// Depositor
    pub depositor: Address,
    /// Deposit change, including collateral gain sent
    pub change: DepositChange,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL OPERATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Any mutating call into the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolOperation {
    /// Open a trove
    OpenTrove(OpenTroveParams),
    /// Adjust a trove
    AdjustTrove(AdjustTroveParams),
    /// Close a trove
    CloseTrove {
        /// Owner
        borrower: Address,
    },
    /// Realize pending rewards
    ApplyPendingRewards {
        /// Owner
        borrower: Address,
    },
    /// Liquidate one trove
    Liquidate {
        /// Caller receiving gas compensation
        liquidator: Address,
        /// Trove to liquidate
        target: Address,
    },
    /// Liquidate up to `n` troves from the lowest ratio up
    LiquidateTroves {
        /// Caller receiving gas compensation
        liquidator: Address,
        /// Maximum troves visited
        n: usize,
    },
    /// Liquidate an explicit list
    BatchLiquidate {
        /// Caller receiving gas compensation
        liquidator: Address,
        /// Troves to try
        targets: Vec<Address>,
    },
    /// Redeem USDD for collateral
    Redeem(RedeemParams),
    /// Claim surplus collateral
    ClaimCollateral {
        /// Owner of the surplus
        borrower: Address,
    },
    /// Deposit into the stability pool
    ProvideToStabilityPool {
        /// Depositor
        depositor: Address,
        /// USDD deposited
        amount: U256,
    },
    /// Withdraw from the stability pool
    WithdrawFromStabilityPool {
        /// Depositor
        depositor: Address,
        /// USDD withdrawn (0 claims gains only)
        amount: U256,
    },
}

impl ProtocolOperation {
    /// Get the operation type name
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::OpenTrove(_) => "OpenTrove",
            Self::AdjustTrove(_) => "AdjustTrove",
            Self::CloseTrove { .. } => "CloseTrove",
            Self::ApplyPendingRewards { .. } => "ApplyPendingRewards",
            Self::Liquidate { .. } => "Liquidate",
            Self::LiquidateTroves { .. } => "LiquidateTroves",
            Self::BatchLiquidate { .. } => "BatchLiquidate",
            Self::Redeem(_) => "Redeem",
            Self::ClaimCollateral { .. } => "ClaimCollateral",
            Self::ProvideToStabilityPool { .. } => "ProvideToStabilityPool",
            Self::WithdrawFromStabilityPool { .. } => "WithdrawFromStabilityPool",
        }
    }
}

/// Result of any protocol operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Open result
    OpenTrove(OpenTroveOutcome),
    /// Adjust result
    AdjustTrove(AdjustTroveOutcome),
    /// Close result
    CloseTrove(CloseTroveOutcome),
    /// Rewards realized
    ApplyPendingRewards(PendingRewards),
    /// Liquidation result
    Liquidation(LiquidationOutcome),
    /// Redemption result
    Redemption(RedemptionOutcome),
    /// Collateral claimed
    ClaimCollateral(U256),
    /// Stability pool result
    StabilityPool(StabilityPoolOutcome),
}

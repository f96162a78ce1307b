//! Error types for the USDD trove engine.
//!
//! Every rejection is raised before any state is written, so an `Err` always
//! means the ledger, the pools and the token balances are exactly as they
//! were before the call.

use primitive_types::U256;
use std::fmt;
use thiserror::Error;

use crate::utils::crypto::Address;

/// Result type alias for USDD operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which collateralization rule a rejected operation broke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioCheck {
    /// Resulting individual ratio below the minimum collateral ratio
    IcrBelowMcr,
    /// Resulting individual ratio below the critical ratio (Recovery Mode)
    IcrBelowCcr,
    /// Resulting system ratio below the critical ratio
    TcrBelowCcr,
    /// Recovery Mode debt increase that does not improve the individual ratio
    IcrNotImproved,
    /// Redemption attempted while the system ratio is below the minimum
    TcrBelowMcr,
}

impl fmt::Display for RatioCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RatioCheck::IcrBelowMcr => "ICR below MCR",
            RatioCheck::IcrBelowCcr => "ICR below CCR in Recovery Mode",
            RatioCheck::TcrBelowCcr => "TCR would fall below CCR",
            RatioCheck::IcrNotImproved => "ICR must not decrease in Recovery Mode",
            RatioCheck::TcrBelowMcr => "TCR below MCR",
        };
        f.write_str(text)
    }
}

/// Main error type for the USDD engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Position Lifecycle Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Structurally malformed request
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Position is not active
    #[error("Trove does not exist or is closed: {0}")]
    PositionNotFound(Address),

    /// Position is already active
    #[error("Trove is already active: {0}")]
    PositionAlreadyActive(Address),

    /// The only remaining position cannot be removed
    #[error("Only one trove in the system")]
    LastPositionRestriction,

    // ═══════════════════════════════════════════════════════════════════
    // Collateralization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// A collateral ratio rule was violated
    #[error("Collateralization violation ({check}): ratio {ratio}, required {required}")]
    CollateralizationViolation {
        /// The rule that failed
        check: RatioCheck,
        /// Ratio the operation would produce (18 decimals)
        ratio: U256,
        /// Threshold it was compared against (18 decimals)
        required: U256,
    },

    /// Operation forbidden while the system is in Recovery Mode
    #[error("Operation not permitted during Recovery Mode: {0}")]
    RecoveryModeRestriction(String),

    // ═══════════════════════════════════════════════════════════════════
    // Fee Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Max fee out of range or actual fee above the caller's maximum
    #[error("Fee bounds violation: {0}")]
    FeeBoundsViolation(String),

    // ═══════════════════════════════════════════════════════════════════
    // Balance Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Caller lacks the debt tokens to cover a repayment
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount needed
        required: U256,
        /// Amount held
        available: U256,
    },

    /// Resulting net debt below the protocol minimum
    #[error("Net debt {net_debt} below minimum {minimum}")]
    DebtFloorViolation {
        /// Net debt the operation would produce
        net_debt: U256,
        /// Protocol minimum net debt
        minimum: U256,
    },

    /// Tokens cannot be sent to a protocol-internal address
    #[error("Cannot transfer tokens directly to protocol address {0}")]
    ProtectedRecipient(Address),

    // ═══════════════════════════════════════════════════════════════════
    // Liquidation / Redemption / Pool Errors
    // ═══════════════════════════════════════════════════════════════════

    /// No position in the request could be liquidated
    #[error("Nothing to liquidate")]
    NothingToLiquidate,

    /// Redemption drew no collateral
    #[error("Unable to redeem any amount")]
    UnableToRedeem,

    /// Surplus bucket is empty
    #[error("No collateral available to claim for {0}")]
    NoCollateralToClaim(Address),

    /// Depositor has no stability pool deposit
    #[error("No stability pool deposit for {0}")]
    NoDeposit(Address),

    /// Stability pool withdrawals are blocked while a trove is below MCR
    #[error("Cannot withdraw while there are troves with ICR < MCR")]
    UndercollateralizedPositions,

    // ═══════════════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Configuration / Serialization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the caller can re-derive parameters and resubmit
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CollateralizationViolation { .. }
                | Error::FeeBoundsViolation(_)
                | Error::InsufficientBalance { .. }
                | Error::DebtFloorViolation { .. }
                | Error::RecoveryModeRestriction(_)
                | Error::UnableToRedeem
        )
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_)
                | Error::Internal(_)
                | Error::Overflow { .. }
                | Error::Underflow { .. }
        )
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Position lifecycle errors: 1xxx
            Error::InvalidOperation(_) => 1001,
            Error::PositionNotFound(_) => 1002,
            Error::PositionAlreadyActive(_) => 1003,
            Error::LastPositionRestriction => 1004,

            // Collateralization errors: 2xxx
            Error::CollateralizationViolation { .. } => 2001,
            Error::RecoveryModeRestriction(_) => 2002,

            // Fee errors: 3xxx
            Error::FeeBoundsViolation(_) => 3001,

            // Balance errors: 4xxx
            Error::InsufficientBalance { .. } => 4001,
            Error::DebtFloorViolation { .. } => 4002,
            Error::ProtectedRecipient(_) => 4003,

            // Liquidation / redemption / pool errors: 5xxx
            Error::NothingToLiquidate => 5001,
            Error::UnableToRedeem => 5002,
            Error::NoCollateralToClaim(_) => 5003,
            Error::NoDeposit(_) => 5004,
            Error::UndercollateralizedPositions => 5005,

            // Validation errors: 6xxx
            Error::InvalidParameter { .. } => 6001,
            Error::ZeroAmount => 6002,
            Error::Overflow { .. } => 6003,
            Error::Underflow { .. } => 6004,

            // Configuration / serialization errors: 7xxx
            Error::Config(_) => 7001,
            Error::Serialization(_) => 7002,
            Error::Deserialization(_) => 7003,

            // Internal errors: 9xxx
            Error::InvariantViolation(_) => 9001,
            Error::Internal(_) => 9002,
        }
    }
}

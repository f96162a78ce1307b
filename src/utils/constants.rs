//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing. Ratios,
//! rates and amounts are 18-decimal fixed-point values.

use primitive_types::U256;

/// Build a `U256` from a raw value that fits in one limb
pub const fn wad(raw: u64) -> U256 {
    U256([raw, 0, 0, 0])
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED-POINT CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-point scale: 1e18
pub const DECIMAL_PRECISION: U256 = wad(1_000_000_000_000_000_000);

/// Half of the fixed-point scale, used for round-half-up multiplication
pub const HALF_DECIMAL_PRECISION: U256 = wad(500_000_000_000_000_000);

/// 100% as a fixed-point ratio
pub const ONE_HUNDRED_PERCENT: U256 = DECIMAL_PRECISION;

/// Decimal exponent of the nominal collateral ratio scale (1e20)
pub const NICR_PRECISION_EXP: usize = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum Collateral Ratio (MCR) - 110%
/// Below this ratio a trove can be liquidated
pub const MIN_COLLATERAL_RATIO: U256 = wad(1_100_000_000_000_000_000);

/// Critical Collateral Ratio (CCR) - 150%
/// When the system TCR falls below this, Recovery Mode applies
pub const CRITICAL_COLLATERAL_RATIO: U256 = wad(1_500_000_000_000_000_000);

// ═══════════════════════════════════════════════════════════════════════════════
// DEBT LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Debt reserved per trove to compensate liquidators (whole USDD)
pub const GAS_COMPENSATION_UNITS: u64 = 200;

/// Minimum net debt of an active trove (whole USDD)
pub const MIN_NET_DEBT_UNITS: u64 = 1_800;

/// Share of a liquidated trove's collateral paid to the liquidator (1 / 200 = 0.5%)
pub const PERCENT_DIVISOR: u64 = 200;

// ═══════════════════════════════════════════════════════════════════════════════
// FEE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Borrowing fee floor - 0.5%
pub const BORROWING_FEE_FLOOR: U256 = wad(5_000_000_000_000_000);

/// Borrowing fee ceiling - 5%
pub const MAX_BORROWING_FEE: U256 = wad(50_000_000_000_000_000);

/// Redemption fee floor - 0.5%
pub const REDEMPTION_FEE_FLOOR: U256 = wad(5_000_000_000_000_000);

/// Per-minute base rate decay factor, a 12 hour half-life
pub const MINUTE_DECAY_FACTOR: U256 = wad(999_037_758_833_783_000);

/// Divisor applied to the redeemed supply fraction when bumping the base rate
pub const BETA: u64 = 2;

// ═══════════════════════════════════════════════════════════════════════════════
// TIME CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Seconds per minute, the granularity of base rate decay
pub const SECONDS_IN_ONE_MINUTE: u64 = 60;

/// Cap on the exponent of the decay power (1000 years of minutes)
pub const MAX_DECAY_MINUTES: u64 = 525_600_000;

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Scale factor applied to P when it would lose precision (1e9)
pub const SP_SCALE_FACTOR: U256 = wad(1_000_000_000);

// ═══════════════════════════════════════════════════════════════════════════════
// ENCODING CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Address length in bytes
pub const ADDRESS_LENGTH: usize = 20;

/// Hash length in bytes
pub const HASH_LENGTH: usize = 32;

/// Events kept in memory by default
pub const DEFAULT_MAX_EVENTS: usize = 1_000;

//! Fixed-point arithmetic and collateralization math.
//!
//! Values are 18-decimal fixed-point `U256`. Products go through a 512-bit
//! intermediate so `a * b / c` never overflows when the quotient fits, and
//! every division truncates.

use primitive_types::{U256, U512};
use std::convert::TryFrom;

use crate::error::{Error, Result};
use crate::utils::constants::{
    DECIMAL_PRECISION, HALF_DECIMAL_PRECISION, MAX_DECAY_MINUTES, NICR_PRECISION_EXP,
};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

/// `units * 10^decimals`
pub fn dec(units: u64, decimals: usize) -> U256 {
    U256::from(units) * U256::exp10(decimals)
}

/// Whole units scaled to 18 decimals
pub fn to_wad(units: u64) -> U256 {
    dec(units, 18)
}

/// Parse a decimal string such as `"1.5"` into an 18-decimal value
pub fn parse_wad(s: &str) -> Result<U256> {
    let invalid = |reason: &str| Error::InvalidParameter {
        name: "decimal".into(),
        reason: format!("{}: {:?}", reason, s),
    };

    let (whole, frac) = match s.trim().split_once('.') {
        Some((w, f)) => (w, f),
        None => (s.trim(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("empty value"));
    }
    if frac.len() > 18 {
        return Err(invalid("more than 18 fractional digits"));
    }

    let whole = if whole.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(whole).map_err(|_| invalid("not a number"))?
    };
    let frac = if frac.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(frac).map_err(|_| invalid("not a number"))?
            * U256::exp10(18 - frac.len())
    };

    let scaled = whole.checked_mul(DECIMAL_PRECISION).ok_or_else(|| Error::Overflow {
        operation: format!("parse {}", s),
    })?;
    add(scaled, frac)
}

/// Render an 18-decimal value as a decimal string without trailing zeros
pub fn format_wad(value: U256) -> String {
    let whole = value / DECIMAL_PRECISION;
    let frac = value % DECIMAL_PRECISION;
    if frac.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{:0>18}", frac.to_string());
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn add(a: U256, b: U256) -> Result<U256> {
    a.checked_add(b).ok_or_else(|| Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn sub(a: U256, b: U256) -> Result<U256> {
    a.checked_sub(b).ok_or_else(|| Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Safe multiplication with overflow check
pub fn mul(a: U256, b: U256) -> Result<U256> {
    a.checked_mul(b).ok_or_else(|| Error::Overflow {
        operation: format!("{} * {}", a, b),
    })
}

/// Computes `a * b / c`, truncating
pub fn mul_div(a: U256, b: U256, c: U256) -> Result<U256> {
    if c.is_zero() {
        return Err(Error::InvalidParameter {
            name: "divisor".into(),
            reason: "division by zero".into(),
        });
    }
    let quotient = a.full_mul(b) / U512::from(c);
    U256::try_from(quotient).map_err(|_| Error::Overflow {
        operation: format!("({} * {}) / {}", a, b, c),
    })
}

/// Fixed-point product rounded half up: `(x * y + 0.5e18) / 1e18`
pub fn dec_mul(x: U256, y: U256) -> Result<U256> {
    let product = x.full_mul(y) + U512::from(HALF_DECIMAL_PRECISION);
    U256::try_from(product / U512::from(DECIMAL_PRECISION)).map_err(|_| Error::Overflow {
        operation: format!("dec_mul({}, {})", x, y),
    })
}

/// `base^minutes` for an 18-decimal base, by exponentiation by squaring.
///
/// The exponent is capped at [`MAX_DECAY_MINUTES`]; for `base < 1` the
/// result has long reached zero by then.
pub fn dec_pow(base: U256, minutes: u64) -> Result<U256> {
    let mut n = minutes.min(MAX_DECAY_MINUTES);
    if n == 0 {
        return Ok(DECIMAL_PRECISION);
    }

    let mut y = DECIMAL_PRECISION;
    let mut x = base;
    while n > 1 {
        if n % 2 == 0 {
            x = dec_mul(x, x)?;
            n /= 2;
        } else {
            y = dec_mul(x, y)?;
            x = dec_mul(x, x)?;
            n = (n - 1) / 2;
        }
    }
    dec_mul(x, y)
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CALCULATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral ratio `coll * price / debt`, infinite (`U256::MAX`) when debt is zero
pub fn compute_cr(coll: U256, debt: U256, price: U256) -> Result<U256> {
    if debt.is_zero() {
        return Ok(U256::MAX);
    }
    mul_div(coll, price, debt)
}

/// Price-independent ratio `coll * 1e20 / debt` used to order troves
pub fn compute_nominal_cr(coll: U256, debt: U256) -> Result<U256> {
    if debt.is_zero() {
        return Ok(U256::MAX);
    }
    mul_div(coll, U256::exp10(NICR_PRECISION_EXP), debt)
}

/// Apply a signed change to a value
pub fn apply_change(value: U256, change: U256, increase: bool) -> Result<U256> {
    if increase {
        add(value, change)
    } else {
        sub(value, change)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERDE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// (De)serialize an 18-decimal `U256` as a human-readable decimal string.
///
/// Used for configuration files, where `"1.1"` reads better than a hex word.
pub mod decimal_string {
    use primitive_types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as `"1.1"`
    pub fn serialize<S>(value: &U256, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_wad(*value))
    }

    /// Deserialize from `"1.1"`
    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_wad(&s).map_err(serde::de::Error::custom)
    }
}

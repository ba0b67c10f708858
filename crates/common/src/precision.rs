//! Exact fixed-point arithmetic for prices and quantities
//!
//! Every price and quantity in the engine is an [`Amount`]: a non-negative
//! decimal value that never passes through floating point. A [`Scale`]
//! carries the per-asset decimal count and converts between human-readable
//! strings, integer base units and `Amount`s.
//!
//! Subtraction that would go below zero fails with
//! [`PrecisionError::Underflow`]. Under the engine's invariants this can
//! only happen through a programming error, so callers treat it as a
//! consistency signal rather than a business rejection.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest decimal count a [`Scale`] accepts
pub const MAX_DECIMALS: u32 = 18;

/// Errors produced by fixed-point arithmetic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrecisionError {
    /// Subtraction would produce a negative value
    #[error("Underflow: {minuend} - {subtrahend} is negative")]
    Underflow {
        /// Left-hand operand
        minuend: Amount,
        /// Right-hand operand
        subtrahend: Amount,
    },

    /// Result does not fit the underlying representation
    #[error("Overflow in fixed-point arithmetic")]
    Overflow,

    /// Value carries more fractional digits than the asset allows
    #[error("Value {value} exceeds {decimals} decimal places")]
    TooPrecise {
        /// Offending value as given
        value: String,
        /// Allowed decimal places
        decimals: u32,
    },

    /// Value is malformed or negative
    #[error("Invalid fixed-point value: {0}")]
    Invalid(String),
}

/// Result type for precision operations
pub type PrecisionResult<T> = std::result::Result<T, PrecisionError>;

// ============================================================================
// Amount
// ============================================================================

/// Non-negative exact decimal used for prices and quantities
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Zero amount
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Wrap a decimal, rejecting negative values
    pub fn new(value: Decimal) -> PrecisionResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(PrecisionError::Invalid(format!("negative value {}", value)));
        }
        Ok(Self(value.normalize()))
    }

    /// Whole-number amount (no fractional digits)
    pub fn whole(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Underlying decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// True when the amount is exactly zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Three-way comparison
    pub fn compare(&self, other: &Amount) -> Ordering {
        self.0.cmp(&other.0)
    }

    /// Exact addition
    pub fn checked_add(self, rhs: Amount) -> PrecisionResult<Amount> {
        self.0
            .checked_add(rhs.0)
            .map(|v| Amount(v.normalize()))
            .ok_or(PrecisionError::Overflow)
    }

    /// Exact subtraction, failing instead of going negative
    pub fn checked_sub(self, rhs: Amount) -> PrecisionResult<Amount> {
        if rhs.0 > self.0 {
            return Err(PrecisionError::Underflow {
                minuend: self,
                subtrahend: rhs,
            });
        }
        self.0
            .checked_sub(rhs.0)
            .map(|v| Amount(v.normalize()))
            .ok_or(PrecisionError::Overflow)
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, rhs: Amount) -> Amount {
        self.checked_sub(rhs).unwrap_or(Amount::ZERO)
    }

    /// Smaller of two amounts
    pub fn min(self, other: Amount) -> Amount {
        if self <= other {
            self
        } else {
            other
        }
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PrecisionError;

    fn try_from(value: Decimal) -> PrecisionResult<Self> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl FromStr for Amount {
    type Err = PrecisionError;

    fn from_str(s: &str) -> PrecisionResult<Self> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|e| PrecisionError::Invalid(format!("{}: {}", s, e)))?;
        Amount::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

// ============================================================================
// Scale
// ============================================================================

/// Per-asset decimal count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Scale {
    decimals: u32,
}

impl Scale {
    /// Create a scale with the given number of decimal places
    pub fn new(decimals: u32) -> PrecisionResult<Self> {
        if decimals > MAX_DECIMALS {
            return Err(PrecisionError::Invalid(format!(
                "{} decimals exceeds maximum of {}",
                decimals, MAX_DECIMALS
            )));
        }
        Ok(Self { decimals })
    }

    /// Number of decimal places
    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// True when `amount` is representable at this scale
    pub fn fits(&self, amount: Amount) -> bool {
        amount.0.normalize().scale() <= self.decimals
    }

    /// Validate an existing amount against this scale
    pub fn check(&self, amount: Amount) -> PrecisionResult<Amount> {
        if self.fits(amount) {
            Ok(amount)
        } else {
            Err(PrecisionError::TooPrecise {
                value: amount.to_string(),
                decimals: self.decimals,
            })
        }
    }

    /// Parse a decimal string such as `"101.25"`
    pub fn parse(&self, s: &str) -> PrecisionResult<Amount> {
        let amount: Amount = s.parse()?;
        if !self.fits(amount) {
            return Err(PrecisionError::TooPrecise {
                value: s.to_string(),
                decimals: self.decimals,
            });
        }
        Ok(amount)
    }

    /// Build an amount from integer base units (`units / 10^decimals`)
    pub fn from_integer(&self, units: u128) -> PrecisionResult<Amount> {
        let mantissa = i128::try_from(units).map_err(|_| PrecisionError::Overflow)?;
        let value = Decimal::try_from_i128_with_scale(mantissa, self.decimals)
            .map_err(|_| PrecisionError::Overflow)?;
        Amount::new(value)
    }

    /// Convert an amount to integer base units (`amount * 10^decimals`)
    pub fn to_integer(&self, amount: Amount) -> PrecisionResult<u128> {
        let amount = self.check(amount)?;
        let factor = Decimal::try_from_i128_with_scale(10i128.pow(self.decimals), 0)
            .map_err(|_| PrecisionError::Overflow)?;
        let scaled = amount
            .0
            .checked_mul(factor)
            .ok_or(PrecisionError::Overflow)?
            .normalize();
        u128::try_from(scaled.mantissa()).map_err(|_| PrecisionError::Overflow)
    }

    /// Add two values of this asset
    pub fn add(&self, a: Amount, b: Amount) -> PrecisionResult<Amount> {
        self.check(a.checked_add(b)?)
    }

    /// Subtract two values of this asset
    pub fn subtract(&self, a: Amount, b: Amount) -> PrecisionResult<Amount> {
        self.check(a.checked_sub(b)?)
    }

    /// Format with exactly `decimals` fractional digits
    pub fn format(&self, amount: Amount) -> String {
        let mut value = amount.0;
        value.rescale(self.decimals);
        value.to_string()
    }
}

impl TryFrom<u32> for Scale {
    type Error = PrecisionError;

    fn try_from(value: u32) -> PrecisionResult<Self> {
        Scale::new(value)
    }
}

impl From<Scale> for u32 {
    fn from(value: Scale) -> Self {
        value.decimals
    }
}

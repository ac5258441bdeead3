// crates/epayroll-core/src/core/money.rs
// ============================================================================
// Module: Electronic Payroll Amounts
// Description: Fixed-precision decimal amounts for payroll values.
// Purpose: Carry monetary values and percentages without rounding drift.
// Dependencies: bigdecimal, serde
// ============================================================================

//! ## Overview
//! Payroll amounts are exact decimals with at most two fractional digits.
//! Values carrying more precision are rejected at the boundary so that the
//! canonical rendering never rounds. The canonical text always has exactly
//! two fractional digits, a `.` separator, and no grouping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::ops::Add;
use std::ops::Sub;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when decimal text is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// Text is not a decimal number.
    #[error("malformed amount: {0}")]
    Malformed(String),
    /// Value carries more than two fractional digits.
    #[error("amount {0} has more than two fractional digits")]
    Precision(String),
}

// ============================================================================
// SECTION: Amount
// ============================================================================

/// Exact decimal value with two fractional digits.
///
/// # Invariants
/// - The stored value never carries more than [`Amount::SCALE`] fractional digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigDecimal);

impl Amount {
    /// Fractional digits carried by every amount.
    pub const SCALE: i64 = 2;

    /// Returns the zero amount.
    #[must_use]
    pub fn zero() -> Self {
        Self(BigDecimal::from(0).with_scale(Self::SCALE))
    }

    /// Parses decimal text such as `2140606` or `1980606.50`.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] when the text is malformed or too precise.
    pub fn parse(text: &str) -> Result<Self, AmountError> {
        let value = BigDecimal::from_str(text.trim())
            .map_err(|_| AmountError::Malformed(text.to_string()))?;
        Self::from_decimal(value)
    }

    /// Wraps an existing decimal value.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Precision`] when the value needs more than two
    /// fractional digits.
    pub fn from_decimal(value: BigDecimal) -> Result<Self, AmountError> {
        let (_, scale) = value.normalized().as_bigint_and_exponent();
        if scale > Self::SCALE {
            return Err(AmountError::Precision(value.to_string()));
        }
        Ok(Self(value.with_scale(Self::SCALE)))
    }

    /// Creates an amount from a whole number of units.
    #[must_use]
    pub fn from_units(units: i64) -> Self {
        Self(BigDecimal::from(units).with_scale(Self::SCALE))
    }

    /// Returns the underlying decimal.
    #[must_use]
    pub const fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    /// Returns true when the amount is below zero.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0 < BigDecimal::from(0)
    }

    /// Renders the canonical text form: two fractional digits, `.` separator.
    #[must_use]
    pub fn canonical(&self) -> String {
        let (digits, _) = self.0.with_scale(Self::SCALE).as_bigint_and_exponent();
        let text = digits.to_string();
        let (sign, magnitude) = match text.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", text.as_str()),
        };
        let padded = format!("{magnitude:0>3}");
        let (whole, fraction) = padded.split_at(padded.len() - 2);
        format!("{sign}{whole}.{fraction}")
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl Add for &Amount {
    type Output = Amount;

    fn add(self, rhs: Self) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl Sub for &Amount {
    type Output = Amount;

    fn sub(self, rhs: Self) -> Amount {
        Amount(&self.0 - &rhs.0)
    }
}

impl<'a> std::iter::Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, value| &acc + value)
    }
}

// ============================================================================
// SECTION: Serde
// ============================================================================

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Visitor accepting decimal strings and integers.
struct AmountVisitor;

impl de::Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a decimal string or an integer")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
        Amount::parse(value).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Amount, E> {
        Ok(Amount::from_units(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Amount, E> {
        Ok(Amount(BigDecimal::from(value).with_scale(Amount::SCALE)))
    }

    fn visit_f64<E: de::Error>(self, _value: f64) -> Result<Amount, E> {
        Err(E::custom("floating point amounts are not accepted; use a decimal string"))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

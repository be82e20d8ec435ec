//! Amount type for handling monetary values as they appear on bank statements.
//!
//! This module provides the `Amount` type which wraps `Decimal` and handles parsing values that
//! may include a currency symbol, thousands separators, or accounting-style parentheses.

use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Represents a signed monetary amount.
///
/// The scale of the parsed value is preserved, so `-12.50` displays as `-12.50` and not `-12.5`.
/// Because the display form feeds into transaction fingerprints, it is always the bare decimal
/// with no currency symbol or separators.
///
/// # Examples
///
/// ```
/// # use spendlens::model::Amount;
/// # use std::str::FromStr;
/// let amount = Amount::from_str("-$1,250.50").unwrap();
/// assert_eq!(amount.to_string(), "-1250.50");
///
/// let refund = Amount::from_str("(19.99)").unwrap();
/// assert!(refund.is_negative());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is negative. Zero is neither negative nor positive.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }
}

/// An error that can occur when parsing strings into `Amount` values.
pub struct AmountError {
    input: String,
    source: Option<rust_decimal::Error>,
}

impl Debug for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AmountError({:?}, {:?})", self.input, self.source)
    }
}

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(e) => write!(f, "invalid amount '{}': {e}", self.input),
            None => write!(f, "invalid amount '{}'", self.input),
        }
    }
}

impl Error for AmountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn Error + 'static))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |source| AmountError {
            input: s.to_string(),
            source,
        };
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(err(None));
        }

        // Accounting notation: "(12.00)" means "-12.00"
        let (negative, body) = match trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => (true, inner.trim()),
            None => match trimmed.strip_prefix('-') {
                Some(rest) => (true, rest.trim()),
                None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
            },
        };

        // Currency symbol may appear on either side of the minus sign: "-$5" or "$-5"
        let body = body.strip_prefix('$').unwrap_or(body);
        let (negative, body) = match body.strip_prefix('-') {
            Some(rest) if !negative => (true, rest),
            Some(_) => return Err(err(None)),
            None => (negative, body),
        };

        let digits = body.replace(',', "");
        if digits.is_empty() {
            return Err(err(None));
        }
        let value = Decimal::from_str(&digits).map_err(|e| err(Some(e)))?;
        Ok(Amount(if negative { -value } else { value }))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Models frequently emit amounts as JSON numbers even when asked for strings, so both are
/// accepted. Numbers go through their textual form to avoid binary floating point artifacts.
struct AmountVisitor;

impl Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("a decimal amount as a string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        Amount::from_str(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Ok(Amount(Decimal::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount(Decimal::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        Amount::from_str(&v.to_string()).map_err(E::custom)
    }
}

impl schemars::JsonSchema for Amount {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "Amount".into()
    }

    fn json_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "string",
            "description": "Signed decimal amount, e.g. \"-12.50\"",
        })
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

//! Settlement-currency amounts for AP2 mandates and captures.
//!
//! All monetary values in the protocol — unit prices, cart totals, payment
//! mandate amounts, capture and refund amounts — are [`Amount`]s: fixed-point
//! decimals normalized to two fractional digits of the settlement currency at
//! construction time. No operation in the protocol rounds beyond that scale.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A monetary amount in the settlement currency, held at two decimal places.
///
/// # Serialization
///
/// Serialized as a decimal string (`"1133.00"`) so no JSON parser can degrade
/// it to a binary float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

/// Error returned when parsing an invalid amount string.
#[derive(Debug, thiserror::Error)]
#[error("invalid amount {0:?}")]
pub struct AmountParseError(String);

impl Amount {
    /// The zero amount.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Creates an amount from a decimal value, rescaling to two places.
    ///
    /// Values with more than two fractional digits are rounded half-up at
    /// construction, which is the only rounding the protocol ever performs.
    #[must_use]
    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Creates an amount from an integer number of cents.
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// Returns the inner decimal value.
    #[must_use]
    pub const fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Checked addition; `None` on overflow.
    #[must_use]
    pub fn checked_add(&self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self::new)
    }

    /// Checked subtraction; `None` on overflow.
    #[must_use]
    pub fn checked_sub(&self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self::new)
    }

    /// Multiplies a unit price by a quantity; `None` on overflow.
    #[must_use]
    pub fn checked_mul_quantity(&self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(Decimal::from(quantity)).map(Self::new)
    }

    /// Whether this amount is strictly greater than zero.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Always render both fractional digits: "1133.00", not "1133".
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s).map_err(|_| AmountParseError(s.to_owned()))?;
        Ok(Self::new(value))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let amount: Amount = "1129.50".parse().unwrap();
        assert_eq!(amount.to_string(), "1129.50");
    }

    #[test]
    fn test_display_pads_fraction() {
        let amount: Amount = "2".parse().unwrap();
        assert_eq!(amount.to_string(), "2.00");
    }

    #[test]
    fn test_normalizes_to_two_places() {
        let amount: Amount = "10.005".parse().unwrap();
        assert_eq!(amount.to_string(), "10.01");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("one dollar".parse::<Amount>().is_err());
    }

    #[test]
    fn test_line_total() {
        let unit: Amount = "1129.50".parse().unwrap();
        let total = unit.checked_mul_quantity(2).unwrap();
        assert_eq!(total.to_string(), "2259.00");
    }

    #[test]
    fn test_cart_total_with_tax_and_shipping() {
        let item: Amount = "1129.50".parse().unwrap();
        let tax: Amount = "1.50".parse().unwrap();
        let shipping: Amount = "2.00".parse().unwrap();
        let total = item
            .checked_add(tax)
            .and_then(|t| t.checked_add(shipping))
            .unwrap();
        assert_eq!(total.to_string(), "1133.00");
    }

    #[test]
    fn test_serde_round_trip_as_string() {
        let amount = Amount::from_cents(113_300);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1133.00\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_ordering() {
        let small: Amount = "50.00".parse().unwrap();
        let large: Amount = "1133.00".parse().unwrap();
        assert!(small < large);
    }
}

//! Type-safe price representation using decimal arithmetic.

use core::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors that can occur when constructing a [`Price`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The amount is below zero.
    #[error("price cannot be negative")]
    Negative,
    /// The input is not a decimal number.
    #[error("price must be a number")]
    NotANumber,
}

/// A non-negative amount in a currency's standard unit (dollars, not cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// A price of zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a price, rejecting negative amounts.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::Negative` if `amount < 0`.
    pub fn new(amount: Decimal) -> Result<Self, PriceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative);
        }
        Ok(Self(amount))
    }

    /// Create a price from an integer number of cents.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::Negative` if `cents < 0`.
    pub fn from_cents(cents: i64) -> Result<Self, PriceError> {
        Self::new(Decimal::new(cents, 2))
    }

    /// Parse a price from user input such as `"19.99"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a number or is negative.
    pub fn parse(s: &str) -> Result<Self, PriceError> {
        let amount: Decimal = s.trim().parse().map_err(|_| PriceError::NotANumber)?;
        Self::new(amount)
    }

    /// Returns the decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Multiply by a quantity.
    #[must_use]
    pub fn times(&self, quantity: u32) -> Self {
        Self(self.0 * Decimal::from(quantity))
    }

    /// Subtract a discount, flooring at zero.
    #[must_use]
    pub fn saturating_sub(&self, discount: Decimal) -> Self {
        let value = self.0 - discount;
        if value.is_sign_negative() {
            Self::ZERO
        } else {
            Self(value)
        }
    }

    /// Round to two decimal places, midpoints away from zero.
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Format with the currency symbol, e.g. `$19.99`.
    #[must_use]
    pub fn display(&self, currency: CurrencyCode) -> String {
        format!("{}{}", currency.symbol(), self)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.rounded().0)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = PriceError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl std::iter::Sum for Price {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|p| p.0).sum())
    }
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Display symbol for the currency.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }

    /// Three-letter code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_rejects_negative() {
        assert_eq!(Price::new(dec("-0.01")), Err(PriceError::Negative));
        assert!(Price::new(Decimal::ZERO).is_ok());
    }

    #[test]
    fn test_parse() {
        assert_eq!(Price::parse("19.99").unwrap().amount(), dec("19.99"));
        assert_eq!(Price::parse("abc"), Err(PriceError::NotANumber));
        assert_eq!(Price::parse("-5"), Err(PriceError::Negative));
    }

    #[test]
    fn test_display_two_decimals() {
        assert_eq!(Price::parse("5").unwrap().to_string(), "5.00");
        assert_eq!(Price::parse("2.345").unwrap().to_string(), "2.35");
        assert_eq!(
            Price::from_cents(1999).unwrap().display(CurrencyCode::GBP),
            "£19.99"
        );
    }

    #[test]
    fn test_arithmetic() {
        let p = Price::parse("10.00").unwrap();
        assert_eq!(p.times(3).amount(), dec("30.00"));
        assert_eq!(p.saturating_sub(dec("15")), Price::ZERO);
        let total: Price = [p, p].into_iter().sum();
        assert_eq!(total.amount(), dec("20.00"));
    }

    #[test]
    fn test_deserialize_rejects_negative() {
        assert!(serde_json::from_str::<Price>("\"-1.00\"").is_err());
        assert_eq!(
            serde_json::from_str::<Price>("\"4.50\"").unwrap().amount(),
            dec("4.50")
        );
    }
}

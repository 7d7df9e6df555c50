use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{op, sqlite_text_type};

/// Number of decimal places that off-chain money amounts are rounded to.
pub const MONEY_DECIMAL_PLACES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("'{0}' is not a valid amount")]
    NotNumeric(String),
    #[error("Amount cannot be negative: {0}")]
    Negative(Decimal),
    #[error("Percentage must be between 0 and 100, got {0}")]
    PercentageOutOfRange(Decimal),
}

/// Rounds to two decimal places, with midpoints rounded away from zero (so 0.125 becomes 0.13).
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

//--------------------------------------        Money        ---------------------------------------------------------
/// A decimal money amount in the marketplace's settlement currency.
///
/// `Money` can represent negative values (e.g. when computing differences) but the constructors used on external
/// input, [`Money::try_non_negative`] and [`FromStr`], reject them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, AddAssign, add_assign);
op!(inplace Money, SubAssign, sub_assign);
op!(unary Money, Neg, neg);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn try_non_negative(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative(value));
        }
        Ok(Self(value))
    }

    /// Shorthand for whole-unit amounts, mostly useful in tests and fixtures.
    pub fn from_units(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `round2(self × pct / 100)`
    pub fn percent(&self, pct: Percentage) -> Money {
        Self(round2(self.0 * pct.value() / Decimal::ONE_HUNDRED))
    }

    /// `round2(self × bps / 10 000)`
    pub fn basis_points(&self, bps: u32) -> Money {
        Self(round2(self.0 * Decimal::from(bps) / Decimal::from(10_000)))
    }

    pub fn round2(&self) -> Money {
        Self(round2(self.0))
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| MoneyError::NotNumeric(s.to_string()))?;
        Self::try_non_negative(value)
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

sqlite_text_type!(Money);

//--------------------------------------      Percentage     ---------------------------------------------------------
/// A percentage in the closed range `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Percentage(Decimal);

op!(binary Percentage, Add, add);

impl Percentage {
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(MoneyError::PercentageOutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn from_int(value: u8) -> Result<Self, MoneyError> {
        Self::new(Decimal::from(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Percentage {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Percentage> for Decimal {
    fn from(value: Percentage) -> Self {
        value.0
    }
}

impl FromStr for Percentage {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| MoneyError::NotNumeric(s.to_string()))?;
        Self::new(value)
    }
}

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

sqlite_text_type!(Percentage);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_money() {
        assert_eq!("100.00".parse::<Money>().unwrap(), Money::from_units(100));
        assert_eq!(" 0 ".parse::<Money>().unwrap(), Money::ZERO);
        assert!(matches!("-1".parse::<Money>(), Err(MoneyError::Negative(_))));
        assert!(matches!("ten dollars".parse::<Money>(), Err(MoneyError::NotNumeric(_))));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round2(Decimal::new(125, 3)), Decimal::new(13, 2));
        assert_eq!(round2(Decimal::new(124, 3)), Decimal::new(12, 2));
        let amount = Money::from_str("33.33").unwrap();
        assert_eq!(amount.percent(Percentage::from_int(50).unwrap()).to_string(), "16.67");
    }

    #[test]
    fn basis_points() {
        let amount = Money::from_units(100);
        assert_eq!(amount.basis_points(1000), Money::from_units(10));
        assert_eq!(amount.basis_points(500), Money::from_units(5));
        assert_eq!(amount.basis_points(0), Money::ZERO);
    }

    #[test]
    fn percentages_are_bounded() {
        assert!(Percentage::from_str("100").is_ok());
        assert!(Percentage::from_str("0").is_ok());
        assert!(Percentage::from_str("100.01").is_err());
        assert!(serde_json::from_str::<Percentage>("\"101\"").is_err());
    }

    #[test]
    fn display_is_normalized() {
        assert_eq!(Money::from_str("90.00").unwrap().to_string(), "90");
        assert_eq!(Money::from_str("12.50").unwrap().to_string(), "12.5");
    }
}

//! Conversion between off-chain decimal amounts and the token's integer base units.
use std::str::FromStr;

use bsg_common::Money;
use ethers::types::U256;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("Token decimals of {0} are not supported")]
    UnsupportedDecimals(u32),
    #[error("{amount} cannot be expressed in base units with {decimals} decimals")]
    NotRepresentable { amount: String, decimals: u32 },
    #[error("Negative amounts cannot be converted to base units: {0}")]
    Negative(Money),
}

const MAX_DECIMALS: u32 = 18;

fn scale(decimals: u32) -> Result<Decimal, UnitsError> {
    if decimals > MAX_DECIMALS {
        return Err(UnitsError::UnsupportedDecimals(decimals));
    }
    Ok(Decimal::from(10u64.pow(decimals)))
}

/// Converts a decimal amount into token base units, e.g. `12.5` with 6 decimals becomes `12500000`.
///
/// Amounts with more precision than the token supports are rejected rather than silently truncated.
pub fn money_to_base_units(amount: Money, decimals: u32) -> Result<U256, UnitsError> {
    if amount.value().is_sign_negative() && !amount.is_zero() {
        return Err(UnitsError::Negative(amount));
    }
    let not_representable = || UnitsError::NotRepresentable { amount: amount.to_string(), decimals };
    let scaled = amount.value().checked_mul(scale(decimals)?).ok_or_else(not_representable)?;
    if scaled.fract() != Decimal::ZERO {
        return Err(not_representable());
    }
    U256::from_dec_str(&scaled.trunc().normalize().to_string()).map_err(|_| not_representable())
}

/// Converts token base units back into a decimal amount.
pub fn base_units_to_money(units: U256, decimals: u32) -> Result<Money, UnitsError> {
    let not_representable = || UnitsError::NotRepresentable { amount: units.to_string(), decimals };
    let value = Decimal::from_str(&units.to_string()).map_err(|_| not_representable())?;
    let money = value.checked_div(scale(decimals)?).ok_or_else(not_representable)?;
    Ok(Money::new(money.normalize()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn six_decimal_token() {
        let amount = Money::from_str("12.5").unwrap();
        let units = money_to_base_units(amount, 6).unwrap();
        assert_eq!(units, U256::from(12_500_000u64));
        assert_eq!(base_units_to_money(units, 6).unwrap(), amount);
    }

    #[test]
    fn eighteen_decimal_token() {
        let amount = Money::from_str("100.00").unwrap();
        let units = money_to_base_units(amount, 18).unwrap();
        assert_eq!(units, U256::from_dec_str("100000000000000000000").unwrap());
        assert_eq!(base_units_to_money(units, 18).unwrap(), Money::from_units(100));
    }

    #[test]
    fn excess_precision_is_rejected() {
        let amount = Money::from_str("0.001").unwrap();
        assert!(matches!(money_to_base_units(amount, 2), Err(UnitsError::NotRepresentable { .. })));
        assert!(matches!(money_to_base_units(amount, 19), Err(UnitsError::UnsupportedDecimals(19))));
    }
}

//! # Fee calculator
//!
//! Splits a gross booking amount into the platform fee, the referrer fee and the amount owed to the counterparty
//! (the provider). The escrow contract receives the rates in basis points, so that is how they are carried here.
//!
//! | Referrer? | Platform | Referrer |
//! |-----------|----------|----------|
//! | no        | 10 %     | 0 %      |
//! | yes       | 5 %      | 5 %      |
//!
//! Fees are rounded to two decimals and the counterparty amount absorbs the remainder, so the three parts always sum
//! exactly to the total.
use std::str::FromStr;

use bsg_common::{Money, MoneyError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BASIS_POINTS_SCALE: u32 = 10_000;
pub const PLATFORM_FEE_BPS: u32 = 1_000;
pub const PLATFORM_FEE_BPS_WITH_REFERRER: u32 = 500;
pub const REFERRER_FEE_BPS: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("Cannot calculate fees on a negative amount: {0}")]
    NegativeAmount(Decimal),
    #[error("Cannot calculate fees. '{0}' is not a number")]
    NotNumeric(String),
}

impl From<MoneyError> for FeeError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::Negative(v) => FeeError::NegativeAmount(v),
            MoneyError::NotNumeric(s) => FeeError::NotNumeric(s),
            MoneyError::PercentageOutOfRange(v) => FeeError::NotNumeric(v.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRates {
    pub platform_bps: u32,
    pub referrer_bps: u32,
}

impl FeeRates {
    pub fn for_booking(has_referrer: bool) -> Self {
        if has_referrer {
            Self { platform_bps: PLATFORM_FEE_BPS_WITH_REFERRER, referrer_bps: REFERRER_FEE_BPS }
        } else {
            Self { platform_bps: PLATFORM_FEE_BPS, referrer_bps: 0 }
        }
    }

    pub fn total_bps(&self) -> u32 {
        self.platform_bps + self.referrer_bps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub platform_fee_rate: u32,
    pub referrer_fee_rate: u32,
    pub platform_fee: Money,
    pub referrer_fee: Money,
    pub counterparty_amount: Money,
    pub total_amount: Money,
}

impl FeeBreakdown {
    pub fn calculate(total: Money, has_referrer: bool) -> Result<Self, FeeError> {
        let total = Money::try_non_negative(total.value())?;
        let rates = FeeRates::for_booking(has_referrer);
        let platform_fee = total.basis_points(rates.platform_bps);
        let referrer_fee = total.basis_points(rates.referrer_bps);
        let counterparty_amount = total - platform_fee - referrer_fee;
        Ok(Self {
            platform_fee_rate: rates.platform_bps,
            referrer_fee_rate: rates.referrer_bps,
            platform_fee,
            referrer_fee,
            counterparty_amount,
            total_amount: total,
        })
    }

    /// As [`FeeBreakdown::calculate`], for amounts that arrive as text.
    pub fn calculate_from_str(total: &str, has_referrer: bool) -> Result<Self, FeeError> {
        let total = Money::from_str(total)?;
        Self::calculate(total, has_referrer)
    }

    pub fn rates(&self) -> FeeRates {
        FeeRates { platform_bps: self.platform_fee_rate, referrer_bps: self.referrer_fee_rate }
    }
}

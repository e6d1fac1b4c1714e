//! Pricing
//!
//! Minor-unit arithmetic shared by the catalog, the policy resolvers and every solver.
//! Public types carry [`Money`]; the search works on `i64` minor units and only converts
//! back when the plan is assembled.

use decimal_percentage::Percentage;
use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use rusty_money::{Money, iso::Currency};
use thiserror::Error;

/// Errors that can occur during minor-unit arithmetic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    /// Percentage calculation could not be safely converted.
    #[error("percentage conversion overflowed or was not finite")]
    PercentConversion,

    /// Multiplying a unit price by a quantity overflowed.
    #[error("line total overflowed: {unit_minor} x {quantity}")]
    LineOverflow {
        /// Unit price in minor units
        unit_minor: i64,

        /// Requested quantity
        quantity: u32,
    },

    /// A percentage string could not be parsed.
    #[error("invalid percentage: {0}")]
    InvalidPercentage(String),
}

/// Calculate `unit_minor × quantity`, rejecting overflow.
///
/// # Errors
///
/// Returns [`PricingError::LineOverflow`] if the product does not fit in an `i64`.
pub fn line_total(unit_minor: i64, quantity: u32) -> Result<i64, PricingError> {
    unit_minor
        .checked_mul(i64::from(quantity))
        .ok_or(PricingError::LineOverflow {
            unit_minor,
            quantity,
        })
}

/// Calculate a percentage of a minor unit amount, rounding toward zero.
///
/// Loyalty points are never rounded up, so a 1% reward on 1,099 is 10, not 11.
///
/// # Errors
///
/// Returns [`PricingError::PercentConversion`] if the calculation overflows.
pub fn percent_of_minor(percent: &Percentage, minor: i64) -> Result<i64, PricingError> {
    let minor = Decimal::from_i64(minor).ok_or(PricingError::PercentConversion)?;

    ((*percent) * Decimal::ONE) // decimal_percentage doesn't expose the underlying Decimal
        .checked_mul(minor)
        .ok_or(PricingError::PercentConversion)?
        .round_dp_with_strategy(0, RoundingStrategy::ToZero)
        .to_i64()
        .ok_or(PricingError::PercentConversion)
}

/// Return the fractional value of a percentage (`0.05` for 5%).
pub fn percentage_value(percent: &Percentage) -> Decimal {
    (*percent) * Decimal::ONE
}

/// Parse a percentage string (e.g. `"5%"` or `"0.05"`) into a [`Percentage`].
///
/// Parsing goes through [`Decimal`] so `"1%"` is exactly one hundredth.
///
/// # Errors
///
/// Returns [`PricingError::InvalidPercentage`] if the string is not a number.
pub fn parse_percentage(s: &str) -> Result<Percentage, PricingError> {
    let trimmed = s.trim();

    if let Some(percent_str) = trimmed.strip_suffix('%') {
        let value = percent_str
            .trim()
            .parse::<Decimal>()
            .map_err(|_err| PricingError::InvalidPercentage(s.to_string()))?;

        Ok(Percentage::from(value / Decimal::ONE_HUNDRED))
    } else {
        let value = trimmed
            .parse::<Decimal>()
            .map_err(|_err| PricingError::InvalidPercentage(s.to_string()))?;

        Ok(Percentage::from(value))
    }
}

/// Convert minor units back into [`Money`].
pub fn to_money(minor: i64, currency: &Currency) -> Money<'_, Currency> {
    Money::from_minor(minor, currency)
}

/// Convert an `i64` to `f64` only when the conversion is exact.
///
/// `good_lp` stores coefficients as `f64`, which represents integers exactly only up
/// to 2^53 in magnitude.
pub fn i64_to_f64_exact(value: i64) -> Option<f64> {
    let converted = value.to_f64()?;

    (converted.to_i64() == Some(value)).then_some(converted)
}

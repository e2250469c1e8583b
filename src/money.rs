// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Exact two-decimal money arithmetic.
//!
//! Two parsing paths exist and must not be mixed up:
//!
//! - [`parse_amount`] is for display and aggregation of external data. It never
//!   fails; anything non-numeric counts as zero.
//! - [`Money::parse`] and [`Money::from_lenient_input`] are for persistence.
//!   They reject malformed input.
//!
//! # Example
//!
//! ```
//! use billo_core::Money;
//! use rust_decimal_macros::dec;
//!
//! let total = Money::parse("20.00").unwrap();
//! let shares = total.split_even(3);
//! assert_eq!(shares[0].as_decimal(), dec!(6.68));
//! assert_eq!(shares.iter().copied().sum::<Money>(), total);
//! ```

use crate::error::BilloError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Number of fractional digits carried by every amount.
pub const MONEY_SCALE: u32 = 2;

/// Largest amount accepted from input, in cents (999,999,999,999.99).
///
/// Keeps every sum and proportional split well inside `i128` cents and the
/// `Decimal` range.
pub const MAX_CENTS: i64 = 99_999_999_999_999;

/// Fractional digits kept on allocation weights such as percentages.
const WEIGHT_SCALE: u32 = 6;

/// Rounds to cents, half away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Anything a caller may hand to the display helpers.
#[derive(Debug, Clone, Copy)]
pub enum AmountInput<'a> {
    Text(Option<&'a str>),
    Float(f64),
    Decimal(Decimal),
}

impl<'a> From<&'a str> for AmountInput<'a> {
    fn from(value: &'a str) -> Self {
        AmountInput::Text(Some(value))
    }
}

impl<'a> From<&'a String> for AmountInput<'a> {
    fn from(value: &'a String) -> Self {
        AmountInput::Text(Some(value.as_str()))
    }
}

impl<'a> From<Option<&'a str>> for AmountInput<'a> {
    fn from(value: Option<&'a str>) -> Self {
        AmountInput::Text(value)
    }
}

impl From<f64> for AmountInput<'_> {
    fn from(value: f64) -> Self {
        AmountInput::Float(value)
    }
}

impl From<Option<f64>> for AmountInput<'_> {
    fn from(value: Option<f64>) -> Self {
        value.map_or(AmountInput::Text(None), AmountInput::Float)
    }
}

impl From<Decimal> for AmountInput<'_> {
    fn from(value: Decimal) -> Self {
        AmountInput::Decimal(value)
    }
}

impl From<Money> for AmountInput<'_> {
    fn from(value: Money) -> Self {
        AmountInput::Decimal(value.as_decimal())
    }
}

/// Strips whitespace, thousands separators and a leading currency symbol.
fn clean_numeric(raw: &str) -> String {
    let trimmed = raw.trim();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", trimmed),
    };
    let rest = rest.trim_start_matches(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'));
    let mut cleaned = String::with_capacity(rest.len() + 1);
    cleaned.push_str(sign);
    cleaned.extend(rest.chars().filter(|c| *c != ',' && !c.is_whitespace()));
    cleaned
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned = clean_numeric(raw);
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

/// Lenient numeric parse for display and aggregation.
///
/// Null, NaN, infinities and non-numeric strings all yield zero.
pub fn parse_amount<'a>(input: impl Into<AmountInput<'a>>) -> Decimal {
    match input.into() {
        AmountInput::Text(Some(text)) => parse_decimal(text).unwrap_or(Decimal::ZERO),
        AmountInput::Text(None) => Decimal::ZERO,
        AmountInput::Float(value) if value.is_finite() => {
            Decimal::try_from(value).unwrap_or(Decimal::ZERO)
        }
        AmountInput::Float(_) => Decimal::ZERO,
        AmountInput::Decimal(value) => value,
    }
}

/// A money amount with exactly two fractional digits.
///
/// Negative values only arise from balance arithmetic; [`Money::parse`] never
/// produces one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::from_parts(0, 0, 0, false, MONEY_SCALE));

    /// Wraps a decimal, rounding to cents.
    pub fn new(value: Decimal) -> Self {
        Money(round_cents(value))
    }

    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, MONEY_SCALE))
    }

    /// Largest amount [`Money::parse`] and [`Money::from_lenient_input`] accept.
    pub fn max() -> Self {
        Money::from_cents(MAX_CENTS)
    }

    /// Rounds `value` to cents, or `None` when it is negative or above [`Money::max`].
    pub fn from_input_decimal(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return None;
        }
        let money = Money::new(value);
        (money <= Money::max()).then_some(money)
    }

    /// Strict parse of the stored form `^\d+\.\d{2}$`.
    ///
    /// # Errors
    ///
    /// Returns [`BilloError::InvalidAmount`] for anything else, including
    /// negative numbers, values with one or three decimals and amounts above
    /// [`Money::max`].
    pub fn parse(raw: &str) -> Result<Self, BilloError> {
        let invalid = || BilloError::InvalidAmount(raw.to_string());
        let (whole, fraction) = raw.split_once('.').ok_or_else(invalid)?;
        let well_formed = !whole.is_empty()
            && fraction.len() == 2
            && whole.bytes().all(|b| b.is_ascii_digit())
            && fraction.bytes().all(|b| b.is_ascii_digit());
        if !well_formed {
            return Err(invalid());
        }
        Decimal::from_str(raw)
            .ok()
            .and_then(Money::from_input_decimal)
            .ok_or_else(invalid)
    }

    /// Parse for collaborator input such as OCR output or form fields.
    ///
    /// Accepts `"12.5"`, `"$3"` or `"1,024.00"` and normalizes to cents.
    ///
    /// # Errors
    ///
    /// Returns [`BilloError::InvalidAmount`] for empty, non-numeric, negative
    /// or oversized input.
    pub fn from_lenient_input(raw: &str) -> Result<Self, BilloError> {
        parse_decimal(raw)
            .and_then(Money::from_input_decimal)
            .ok_or_else(|| BilloError::InvalidAmount(raw.to_string()))
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    /// Amount in integer cents.
    pub fn cents(self) -> i128 {
        let mut value = self.0;
        value.rescale(MONEY_SCALE);
        value.mantissa()
    }

    fn from_wide_cents(cents: i128) -> Self {
        Money(Decimal::from_i128_with_scale(cents, MONEY_SCALE))
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    /// Splits into `n` shares of whole cents that sum exactly to `self`.
    ///
    /// Every share is `floor(self / n)`; the residual cents all go to index 0.
    /// Returns an empty vector when `n == 0`.
    pub fn split_even(self, n: usize) -> Vec<Money> {
        if n == 0 {
            return Vec::new();
        }
        let total = self.cents();
        let count = n as i128;
        let base = total.div_euclid(count);
        let residual = total - base * count;

        let mut shares = vec![Money::from_wide_cents(base); n];
        shares[0] = Money::from_wide_cents(base + residual);
        shares
    }

    /// Splits `self` in proportion to `weights` using largest remainders.
    ///
    /// Shares sum exactly to `self` and never decrease as the weight grows.
    /// Ties on the remainder go to the larger weight, then the lower index.
    /// Negative weights count as zero. All shares are zero when the weights
    /// sum to zero.
    pub fn allocate(self, weights: &[Money]) -> Vec<Money> {
        let weights: Vec<i128> = weights.iter().map(|w| w.cents().max(0)).collect();
        self.allocate_units(weights)
    }

    /// [`Money::allocate`] over decimal weights such as percentages.
    ///
    /// Weights are rounded to six decimals first; shares are never negative
    /// for a non-negative `self`.
    pub fn allocate_by(self, weights: &[Decimal]) -> Vec<Money> {
        let weights: Vec<i128> = weights
            .iter()
            .map(|w| {
                let mut w = w.round_dp(WEIGHT_SCALE);
                w.rescale(WEIGHT_SCALE);
                w.mantissa().max(0)
            })
            .collect();
        self.allocate_units(weights)
    }

    fn allocate_units(self, mut weights: Vec<i128>) -> Vec<Money> {
        let total = self.cents();
        if total == 0 || weights.iter().all(|w| *w == 0) {
            return vec![Money::ZERO; weights.len()];
        }

        // Coarsen the weights until every product fits.
        let limit = i128::MAX / total.abs() / (weights.len() as i128 + 1);
        while weights.iter().any(|w| *w > limit) {
            weights.iter_mut().for_each(|w| *w /= 10);
        }
        let weight_sum: i128 = weights.iter().sum();
        if weight_sum == 0 {
            return vec![Money::ZERO; weights.len()];
        }

        let mut shares: Vec<i128> = Vec::with_capacity(weights.len());
        let mut remainders: Vec<(i128, i128, usize)> = Vec::with_capacity(weights.len());
        for (index, weight) in weights.iter().enumerate() {
            let exact = total * weight;
            shares.push(exact.div_euclid(weight_sum));
            remainders.push((exact.rem_euclid(weight_sum), *weight, index));
        }

        let residual = total - shares.iter().sum::<i128>();
        remainders.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        for (_, _, index) in remainders.iter().take(residual as usize) {
            shares[*index] += 1;
        }

        shares.into_iter().map(Money::from_wide_cents).collect()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = BilloError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money::new(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money::new(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        *self = *self - rhs;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.strip_prefix('-') {
            Some(magnitude) => Money::parse(magnitude).map(Neg::neg),
            None => Money::parse(&raw),
        }
        .map_err(serde::de::Error::custom)
    }
}

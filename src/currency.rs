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

//! Supported currencies and display formatting.
//!
//! The set is fixed. [`Currency::ALL`] lists it in display order and its first
//! entry is the default used whenever a code is unknown.
//!
//! # Example
//!
//! ```
//! use billo_core::{Currency, format_amount};
//!
//! assert_eq!(format_amount("1234.5", Currency::Usd), "$1,234.50");
//! assert_eq!(format_amount("not a number", Currency::Eur), "€0.00");
//! ```

use crate::error::BilloError;
use crate::money::{AmountInput, parse_amount, round_cents};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
    Jpy,
    Inr,
    Mxn,
    Brl,
    Chf,
}

impl Currency {
    pub const ALL: [Currency; 10] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Cad,
        Currency::Aud,
        Currency::Jpy,
        Currency::Inr,
        Currency::Mxn,
        Currency::Brl,
        Currency::Chf,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
            Currency::Jpy => "JPY",
            Currency::Inr => "INR",
            Currency::Mxn => "MXN",
            Currency::Brl => "BRL",
            Currency::Chf => "CHF",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Currency::Usd => "$",
            Currency::Eur => "€",
            Currency::Gbp => "£",
            Currency::Cad => "CA$",
            Currency::Aud => "A$",
            Currency::Jpy => "¥",
            Currency::Inr => "₹",
            Currency::Mxn => "MX$",
            Currency::Brl => "R$",
            Currency::Chf => "CHF ",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Currency::Usd => "US Dollar",
            Currency::Eur => "Euro",
            Currency::Gbp => "British Pound",
            Currency::Cad => "Canadian Dollar",
            Currency::Aud => "Australian Dollar",
            Currency::Jpy => "Japanese Yen",
            Currency::Inr => "Indian Rupee",
            Currency::Mxn => "Mexican Peso",
            Currency::Brl => "Brazilian Real",
            Currency::Chf => "Swiss Franc",
        }
    }

    /// Strict lookup for persisted preferences.
    ///
    /// # Errors
    ///
    /// Returns [`BilloError::UnknownCurrency`] for codes outside the supported set.
    pub fn from_code(code: &str) -> Result<Self, BilloError> {
        let trimmed = code.trim();
        Self::ALL
            .into_iter()
            .find(|currency| currency.code().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| BilloError::UnknownCurrency(code.to_string()))
    }

    /// Lenient lookup for display; unknown codes fall back to the default.
    pub fn from_code_or_default(code: &str) -> Self {
        Self::from_code(code).unwrap_or_default()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for Currency {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        Currency::from_code(&code).map_err(serde::de::Error::custom)
    }
}

/// Renders an amount with the currency symbol, thousands separators and two decimals.
///
/// Never fails: null, NaN and non-numeric input render as the currency's zero.
/// Display only; persisted totals go through [`crate::Money::parse`].
pub fn format_amount<'a>(amount: impl Into<AmountInput<'a>>, currency: Currency) -> String {
    let value = round_cents(parse_amount(amount));
    let negative = value.is_sign_negative() && !value.is_zero();
    let digits = format!("{:.2}", value.abs());
    let (whole, fraction) = digits.split_once('.').unwrap_or((&digits, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!(
        "{}{}{}.{}",
        if negative { "-" } else { "" },
        currency.symbol(),
        grouped,
        fraction
    )
}

/// Formats a [`Decimal`] directly.
pub fn format_decimal(amount: Decimal, currency: Currency) -> String {
    format_amount(AmountInput::Decimal(amount), currency)
}

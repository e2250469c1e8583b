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

//! Receipts, their line items and acceptance of extracted or manual items.
//!
//! Receipt status follows a small state machine:
//!
//! ```text
//!  Pending ──upload──► Uploading ──► Processing ──► Completed
//!     │                   │              │              ▲
//!     │                   └──────────────┴──► Failed ───┘ (retry via Pending)
//!     └──────────────── manual entry ───────────────────► Completed
//! ```
//!
//! Items enter a receipt only through a [`ReceiptDraft`], produced by
//! [`accept_extraction`] for OCR output or [`accept_manual`] for hand-typed
//! entries. Drafts are fully validated, so committing one can never leave a
//! receipt with a corrupt or half-written item list.

use crate::base::{GroupId, ItemId, ReceiptId, UserId};
use crate::currency::Currency;
use crate::error::BilloError;
use crate::money::Money;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Tolerance between `quantity * unit_price` and `total_price` on manual items.
const LINE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl ReceiptStatus {
    /// Whether the receipt may move from `self` to `next`.
    ///
    /// `Completed -> Completed` is allowed so items can be re-confirmed.
    pub fn can_transition_to(self, next: ReceiptStatus) -> bool {
        use ReceiptStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading | Processing | Completed | Failed)
                | (Uploading, Processing | Failed)
                | (Processing, Completed | Failed)
                | (Completed, Completed)
                | (Failed, Pending | Processing)
        )
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Uploading => "uploading",
            ReceiptStatus::Processing => "processing",
            ReceiptStatus::Completed => "completed",
            ReceiptStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A committed receipt line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    pub id: ItemId,
    pub receipt_id: ReceiptId,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub total_price: Money,
    pub line_number: u32,
    pub category: Option<String>,
}

impl ReceiptItem {
    /// Builds a standalone item, mostly useful for calculations outside a ledger.
    pub fn new(id: ItemId, name: impl Into<String>, total_price: Money) -> Self {
        Self {
            id,
            receipt_id: ReceiptId(0),
            name: name.into(),
            quantity: Decimal::ONE,
            unit_price: total_price,
            total_price,
            line_number: id.0 as u32,
            category: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: ReceiptId,
    pub owner: UserId,
    pub group_id: Option<GroupId>,
    pub currency: Currency,
    pub status: ReceiptStatus,
    pub merchant_name: Option<String>,
    pub merchant_address: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub tax: Money,
    pub total: Money,
    pub items: Vec<ReceiptItem>,
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    pub fn new(
        id: ReceiptId,
        owner: UserId,
        group_id: Option<GroupId>,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            group_id,
            currency,
            status: ReceiptStatus::Pending,
            merchant_name: None,
            merchant_address: None,
            purchase_date: None,
            tax: Money::ZERO,
            total: Money::ZERO,
            items: Vec::new(),
            created_at: now,
        }
    }

    pub fn items_subtotal(&self) -> Money {
        self.items.iter().map(|item| item.total_price).sum()
    }

    pub fn item(&self, id: ItemId) -> Option<&ReceiptItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Moves to `next` if the state machine allows it.
    ///
    /// # Errors
    ///
    /// Returns [`BilloError::InvalidReceiptTransition`] otherwise.
    pub fn transition(&mut self, next: ReceiptStatus) -> Result<(), BilloError> {
        if !self.status.can_transition_to(next) {
            return Err(BilloError::InvalidReceiptTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Replaces tax and recomputes the total.
    pub fn set_tax(&mut self, tax: Money) {
        self.tax = tax;
        self.recompute_total();
    }

    pub fn recompute_total(&mut self) {
        self.total = self.items_subtotal() + self.tax;
    }

    /// Swaps in a validated draft, replacing every previous item.
    ///
    /// `next_item_id` is called once per item, in line order.
    pub(crate) fn apply_draft(
        &mut self,
        draft: ReceiptDraft,
        mut next_item_id: impl FnMut() -> ItemId,
    ) -> Result<(), BilloError> {
        self.transition(ReceiptStatus::Completed)?;
        let receipt_id = self.id;
        self.items = draft
            .items
            .into_iter()
            .map(|item| ReceiptItem {
                id: next_item_id(),
                receipt_id,
                name: item.name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
                line_number: item.line_number,
                category: item.category,
            })
            .collect();
        self.merchant_name = draft.merchant_name;
        self.merchant_address = draft.merchant_address;
        self.purchase_date = draft.purchase_date;
        self.set_tax(draft.tax);
        Ok(())
    }
}

/// A numeric field as a collaborator may send it: a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
}

impl RawNumber {
    fn to_decimal(&self) -> Option<Decimal> {
        match self {
            RawNumber::Number(value) if value.is_finite() => Decimal::from_str(&value.to_string()).ok(),
            RawNumber::Number(_) => None,
            RawNumber::Text(text) => Decimal::from_str(text.trim()).ok().or_else(|| {
                Money::from_lenient_input(text).ok().map(Money::as_decimal)
            }),
        }
    }

    fn describe(&self) -> String {
        match self {
            RawNumber::Number(value) => value.to_string(),
            RawNumber::Text(text) => text.clone(),
        }
    }
}

impl From<&str> for RawNumber {
    fn from(value: &str) -> Self {
        RawNumber::Text(value.to_string())
    }
}

/// One line item as produced by OCR or typed by a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<RawNumber>,
    #[serde(default)]
    pub unit_price: Option<RawNumber>,
    #[serde(default)]
    pub total_price: Option<RawNumber>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
}

impl ItemInput {
    pub fn new(name: &str, quantity: &str, unit_price: &str, total_price: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            quantity: Some(quantity.into()),
            unit_price: Some(unit_price.into()),
            total_price: Some(total_price.into()),
            line_number: None,
            category: None,
        }
    }
}

/// Receipt payload from the OCR collaborator or the manual entry form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptInput {
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub merchant_address: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<String>,
    #[serde(default)]
    pub tax: Option<RawNumber>,
    #[serde(default)]
    pub total_amount: Option<RawNumber>,
    #[serde(default)]
    pub items: Vec<ItemInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftItem {
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub total_price: Money,
    pub line_number: u32,
    pub category: Option<String>,
}

/// Validated receipt content, ready to replace a receipt's items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDraft {
    pub merchant_name: Option<String>,
    pub merchant_address: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub tax: Money,
    pub items: Vec<DraftItem>,
}

impl ReceiptDraft {
    pub fn items_subtotal(&self) -> Money {
        self.items.iter().map(|item| item.total_price).sum()
    }

    /// `Σ item totals + tax`; any total reported by the collaborator is ignored.
    pub fn total(&self) -> Money {
        self.items_subtotal() + self.tax
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Extraction,
    Manual,
}

/// Validates OCR output.
///
/// Merchant and date are optional; a date of `"null"`, empty or unparsable is
/// dropped. Prices are still mandatory.
///
/// # Errors
///
/// Returns [`BilloError::Validation`] naming the first offending field.
pub fn accept_extraction(input: &ReceiptInput) -> Result<ReceiptDraft, BilloError> {
    accept(input, Source::Extraction)
}

/// Validates a manual entry.
///
/// Merchant name and purchase date are required, and every item total must
/// equal `quantity * unit_price` within one cent.
///
/// # Errors
///
/// Returns [`BilloError::Validation`] naming the first offending field.
pub fn accept_manual(input: &ReceiptInput) -> Result<ReceiptDraft, BilloError> {
    accept(input, Source::Manual)
}

fn accept(input: &ReceiptInput, source: Source) -> Result<ReceiptDraft, BilloError> {
    let merchant_name = non_empty(input.merchant_name.as_deref());
    if source == Source::Manual && merchant_name.is_none() {
        return Err(BilloError::validation("merchantName", "merchant name is required"));
    }

    let purchase_date = match (normalize_date_field(input.purchase_date.as_deref()), source) {
        (None, Source::Manual) => {
            return Err(BilloError::validation("purchaseDate", "purchase date is required"));
        }
        (None, Source::Extraction) => None,
        (Some(raw), source) => match parse_purchase_date(raw) {
            Some(date) => Some(date),
            None if source == Source::Manual => {
                return Err(BilloError::validation(
                    "purchaseDate",
                    format!("{raw:?} is not a date"),
                ));
            }
            None => {
                warn!(purchase_date = raw, "dropping unparsable purchase date from extraction");
                None
            }
        },
    };

    let tax = match &input.tax {
        None => Money::ZERO,
        Some(raw) => raw
            .to_decimal()
            .and_then(Money::from_input_decimal)
            .ok_or_else(|| BilloError::validation("tax", format!("{:?} is not a valid amount", raw.describe())))?,
    };

    if input.items.is_empty() && source == Source::Manual {
        return Err(BilloError::validation("items", "at least one item is required"));
    }

    let mut items = input
        .items
        .iter()
        .enumerate()
        .map(|(index, item)| accept_item(index, item, source))
        .collect::<Result<Vec<_>, _>>()?;
    items.sort_by_key(|item| item.line_number);

    Ok(ReceiptDraft {
        merchant_name,
        merchant_address: non_empty(input.merchant_address.as_deref()),
        purchase_date,
        tax,
        items,
    })
}

fn accept_item(index: usize, item: &ItemInput, source: Source) -> Result<DraftItem, BilloError> {
    let field = |name: &str| format!("items[{index}].{name}");
    let name = non_empty(item.name.as_deref())
        .ok_or_else(|| BilloError::validation(field("name"), "item name is required"))?;

    let quantity = match &item.quantity {
        None => Decimal::ONE,
        Some(raw) => raw
            .to_decimal()
            .filter(|quantity| *quantity > Decimal::ZERO)
            .ok_or_else(|| {
                BilloError::validation(
                    field("quantity"),
                    format!("{:?} is not a positive quantity for {name:?}", raw.describe()),
                )
            })?,
    };

    let price = |raw: &Option<RawNumber>, key: &str| -> Result<Money, BilloError> {
        let raw = raw.as_ref().ok_or_else(|| {
            BilloError::validation(field(key), format!("missing price for {name:?}"))
        })?;
        raw.to_decimal()
            .and_then(Money::from_input_decimal)
            .ok_or_else(|| {
                BilloError::validation(
                    field(key),
                    format!("{:?} is not a valid price for {name:?}", raw.describe()),
                )
            })
    };
    let unit_price = price(&item.unit_price, "unitPrice")?;
    let total_price = price(&item.total_price, "totalPrice")?;

    if source == Source::Manual {
        let matches = quantity
            .checked_mul(unit_price.as_decimal())
            .is_some_and(|expected| (expected - total_price.as_decimal()).abs() <= LINE_TOLERANCE);
        if !matches {
            return Err(BilloError::validation(
                field("totalPrice"),
                format!(
                    "{total_price} does not match {} x {unit_price} for {name:?}",
                    quantity.normalize()
                ),
            ));
        }
    }

    Ok(DraftItem {
        quantity: quantity.normalize(),
        unit_price,
        total_price,
        line_number: item.line_number.unwrap_or(index as u32 + 1),
        category: non_empty(item.category.as_deref()),
        name,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// `None`, empty and the literal string `"null"` all mean "no date".
fn normalize_date_field(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("null"))
}

fn parse_purchase_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| raw.get(..10).and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()))
        .or_else(|| NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok())
}

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

//! Assignment of receipt items to people and per-person totals.
//!
//! An [`AssignmentMap`] records, per item, who shares it and how. Shares are
//! always derived from the current assignment, never accumulated, so toggling
//! people on and off cannot drift.
//!
//! # Rounding
//!
//! Every item's shares sum exactly to its total and are never negative. An
//! even split gives the leftover cents to the item's first assignee, in the
//! order people were assigned. Percentage splits hand leftover cents out by
//! largest remainder. Tax is spread over people in proportion to their item subtotals with the
//! largest-remainder method, so the tax shares sum exactly to the tax.
//!
//! # Example
//!
//! ```
//! use billo_core::{AssignmentMap, ItemId, Money, ReceiptItem, UserId, calculate_person_totals};
//!
//! let items = vec![
//!     ReceiptItem::new(ItemId(1), "Pizza", Money::parse("20.00").unwrap()),
//!     ReceiptItem::new(ItemId(2), "Soda", Money::parse("4.00").unwrap()),
//! ];
//! let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));
//!
//! let mut assignments = AssignmentMap::new();
//! assignments.toggle_assignment(ItemId(1), alice.clone());
//! assignments.toggle_assignment(ItemId(1), bob.clone());
//! assignments.toggle_assignment(ItemId(2), alice.clone());
//!
//! let totals = calculate_person_totals(
//!     &items,
//!     &assignments,
//!     &[alice.clone(), bob.clone()],
//!     Money::parse("2.00").unwrap(),
//! );
//! assert_eq!(totals.for_user(&alice).unwrap().total.to_string(), "15.17");
//! assert_eq!(totals.for_user(&bob).unwrap().total.to_string(), "10.83");
//! assert_eq!(totals.grand_total.to_string(), "26.00");
//! ```

use crate::base::{ItemId, UserId};
use crate::error::BilloError;
use crate::money::Money;
use crate::receipt::ReceiptItem;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Split strategy tag as persisted on assignment rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitType {
    /// Even share of the item.
    Full,
    Percentage,
    Amount,
}

impl fmt::Display for SplitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitType::Full => f.write_str("full"),
            SplitType::Percentage => f.write_str("percentage"),
            SplitType::Amount => f.write_str("amount"),
        }
    }
}

/// How one item is divided. Assignee order is significant for rounding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSplit {
    Even(Vec<UserId>),
    Percentage(Vec<(UserId, Decimal)>),
    Amount(Vec<(UserId, Money)>),
}

impl ItemSplit {
    pub fn split_type(&self) -> SplitType {
        match self {
            ItemSplit::Even(_) => SplitType::Full,
            ItemSplit::Percentage(_) => SplitType::Percentage,
            ItemSplit::Amount(_) => SplitType::Amount,
        }
    }

    pub fn assignees(&self) -> Vec<UserId> {
        match self {
            ItemSplit::Even(users) => users.clone(),
            ItemSplit::Percentage(shares) => shares.iter().map(|(u, _)| u.clone()).collect(),
            ItemSplit::Amount(shares) => shares.iter().map(|(u, _)| u.clone()).collect(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            ItemSplit::Even(users) => users.is_empty(),
            ItemSplit::Percentage(shares) => shares.is_empty(),
            ItemSplit::Amount(shares) => shares.is_empty(),
        }
    }

    /// Divides `total` among the assignees.
    ///
    /// Shares are whole cents, never negative, and sum exactly to `total`.
    /// An amount split whose parts no longer match `total` is rescaled in
    /// proportion to its parts (all zero if every part is zero);
    /// [`ItemSplit::validate`] rejects that case before anything is persisted.
    pub fn shares(&self, total: Money) -> Vec<(UserId, Money)> {
        match self {
            ItemSplit::Even(users) => users
                .iter()
                .cloned()
                .zip(total.split_even(users.len()))
                .collect(),
            ItemSplit::Percentage(parts) => {
                let weights: Vec<Decimal> = parts.iter().map(|(_, pct)| *pct).collect();
                parts
                    .iter()
                    .map(|(user, _)| user.clone())
                    .zip(total.allocate_by(&weights))
                    .collect()
            }
            ItemSplit::Amount(parts) => {
                let fixed: Money = parts.iter().map(|(_, amount)| *amount).sum();
                if fixed == total {
                    return parts.clone();
                }
                let weights: Vec<Money> = parts.iter().map(|(_, amount)| *amount).collect();
                parts
                    .iter()
                    .map(|(user, _)| user.clone())
                    .zip(total.allocate(&weights))
                    .collect()
            }
        }
    }

    /// Checks the split against the item it divides.
    ///
    /// # Errors
    ///
    /// Validation error when the split is empty, names someone twice, has a
    /// non-positive percentage, has percentages that do not add up to 100,
    /// has a negative amount, or has amounts that do not add up to the item's
    /// total.
    pub fn validate(&self, item: &ReceiptItem) -> Result<(), BilloError> {
        self.check_parts(item.id)?;
        if let ItemSplit::Amount(parts) = self {
            let sum: Money = parts.iter().map(|(_, amount)| *amount).sum();
            if sum != item.total_price {
                return Err(BilloError::validation(
                    format!("assignments[{}]", item.id),
                    format!("amounts add up to {sum}, expected {}", item.total_price),
                ));
            }
        }
        Ok(())
    }

    /// Everything [`ItemSplit::validate`] checks that does not need the item's total.
    fn check_parts(&self, item_id: ItemId) -> Result<(), BilloError> {
        let field = || format!("assignments[{item_id}]");
        if self.is_empty() {
            return Err(BilloError::validation(field(), "nobody is assigned"));
        }
        ensure_unique(item_id, self.assignees().into_iter())?;
        match self {
            ItemSplit::Even(_) => {}
            ItemSplit::Percentage(parts) => {
                if parts.iter().any(|(_, pct)| *pct <= Decimal::ZERO) {
                    return Err(BilloError::validation(field(), "percentages must be positive"));
                }
                let sum: Decimal = parts.iter().map(|(_, pct)| *pct).sum();
                if sum != dec!(100) {
                    return Err(BilloError::validation(
                        field(),
                        format!("percentages add up to {}, expected 100", sum.normalize()),
                    ));
                }
            }
            ItemSplit::Amount(parts) => {
                if parts.iter().any(|(_, amount)| amount.is_negative()) {
                    return Err(BilloError::validation(field(), "amounts must not be negative"));
                }
            }
        }
        Ok(())
    }
}

fn ensure_unique(item_id: ItemId, users: impl Iterator<Item = UserId>) -> Result<(), BilloError> {
    let mut seen = HashSet::new();
    for user in users {
        if !seen.insert(user.clone()) {
            return Err(BilloError::validation(
                format!("assignments[{item_id}]"),
                format!("{user} is assigned more than once"),
            ));
        }
    }
    Ok(())
}

/// In-memory item → split map, the working copy while people are being assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentMap {
    splits: BTreeMap<ItemId, ItemSplit>,
}

impl AssignmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns every item to every member, evenly.
    pub fn split_evenly(items: &[ReceiptItem], member_ids: &[UserId]) -> Self {
        let mut map = Self::new();
        map.assign_all_evenly(items, member_ids);
        map
    }

    /// Replaces every item's split with an even split over `member_ids`.
    pub fn assign_all_evenly(&mut self, items: &[ReceiptItem], member_ids: &[UserId]) {
        let mut members: Vec<UserId> = Vec::with_capacity(member_ids.len());
        for member in member_ids {
            if !members.contains(member) {
                members.push(member.clone());
            }
        }
        for item in items {
            if members.is_empty() {
                self.splits.remove(&item.id);
            } else {
                self.splits.insert(item.id, ItemSplit::Even(members.clone()));
            }
        }
    }

    /// Adds `user` to the item if absent, removes them if present.
    ///
    /// The item ends up evenly split over whoever remains assigned; a custom
    /// split on the item is discarded. Returns whether `user` is now assigned.
    pub fn toggle_assignment(&mut self, item_id: ItemId, user: UserId) -> bool {
        let mut users = self
            .splits
            .get(&item_id)
            .map(ItemSplit::assignees)
            .unwrap_or_default();

        let assigned = match users.iter().position(|u| *u == user) {
            Some(index) => {
                users.remove(index);
                false
            }
            None => {
                users.push(user);
                true
            }
        };

        if users.is_empty() {
            self.splits.remove(&item_id);
        } else {
            self.splits.insert(item_id, ItemSplit::Even(users));
        }
        assigned
    }

    /// Splits the item by percentage.
    ///
    /// # Errors
    ///
    /// Validation error unless every percentage is positive, nobody appears
    /// twice and the percentages add up to 100.
    pub fn set_percentage_split(
        &mut self,
        item_id: ItemId,
        parts: Vec<(UserId, Decimal)>,
    ) -> Result<(), BilloError> {
        let split = ItemSplit::Percentage(parts);
        split.check_parts(item_id)?;
        self.splits.insert(item_id, split);
        Ok(())
    }

    /// Splits the item into fixed amounts.
    ///
    /// # Errors
    ///
    /// Validation error unless nobody appears twice, no amount is negative and
    /// the amounts add up to the item's total.
    pub fn set_amount_split(
        &mut self,
        item: &ReceiptItem,
        parts: Vec<(UserId, Money)>,
    ) -> Result<(), BilloError> {
        let split = ItemSplit::Amount(parts);
        split.validate(item)?;
        self.splits.insert(item.id, split);
        Ok(())
    }

    /// Validates every split against the receipt's current items.
    ///
    /// # Errors
    ///
    /// Validation error for a split on an item not in `items`, or any error
    /// from [`ItemSplit::validate`].
    pub fn validate(&self, items: &[ReceiptItem]) -> Result<(), BilloError> {
        for (item_id, split) in &self.splits {
            let item = items.iter().find(|item| item.id == *item_id).ok_or_else(|| {
                BilloError::validation("itemId", format!("item {item_id} is not on this receipt"))
            })?;
            split.validate(item)?;
        }
        Ok(())
    }

    pub fn unassign_item(&mut self, item_id: ItemId) {
        self.splits.remove(&item_id);
    }

    pub fn split(&self, item_id: ItemId) -> Option<&ItemSplit> {
        self.splits.get(&item_id)
    }

    pub fn assignees(&self, item_id: ItemId) -> Vec<UserId> {
        self.splits
            .get(&item_id)
            .map(ItemSplit::assignees)
            .unwrap_or_default()
    }

    pub fn is_assigned(&self, item_id: ItemId) -> bool {
        self.splits.get(&item_id).is_some_and(|split| !split.is_empty())
    }

    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.splits.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    /// Drops splits for items not in `keep`.
    pub fn retain_items(&mut self, keep: &HashSet<ItemId>) {
        self.splits.retain(|id, _| keep.contains(id));
    }

    /// Everyone assigned anywhere, in first-seen order.
    pub fn people(&self) -> Vec<UserId> {
        let mut people: Vec<UserId> = Vec::new();
        for split in self.splits.values() {
            for user in split.assignees() {
                if !people.contains(&user) {
                    people.push(user);
                }
            }
        }
        people
    }

    /// Rebuilds the working map from persisted rows.
    ///
    /// Rows keep their order within an item; the split type of an item's first
    /// row decides the strategy.
    pub fn from_rows(rows: &[ItemAssignment]) -> Self {
        let mut grouped: BTreeMap<ItemId, Vec<&ItemAssignment>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.item_id).or_default().push(row);
        }

        let splits = grouped
            .into_iter()
            .map(|(item_id, rows)| {
                let split = match rows[0].split_type {
                    SplitType::Full => ItemSplit::Even(rows.iter().map(|r| r.user_id.clone()).collect()),
                    SplitType::Percentage => ItemSplit::Percentage(
                        rows.iter()
                            .map(|r| (r.user_id.clone(), r.split_value.unwrap_or(Decimal::ZERO)))
                            .collect(),
                    ),
                    SplitType::Amount => ItemSplit::Amount(
                        rows.iter()
                            .map(|r| (r.user_id.clone(), r.calculated_amount))
                            .collect(),
                    ),
                };
                (item_id, split)
            })
            .collect();
        Self { splits }
    }
}

/// One persisted assignment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemAssignment {
    pub item_id: ItemId,
    pub user_id: UserId,
    pub split_type: SplitType,
    /// `None` for [`SplitType::Full`]; a percentage or fixed amount otherwise.
    pub split_value: Option<Decimal>,
    pub calculated_amount: Money,
}

/// Flattens the map into rows, in item line order then assignee order.
///
/// Splits on items missing from `items` are skipped.
pub fn format_assignments_for_api(
    assignments: &AssignmentMap,
    items: &[ReceiptItem],
) -> Vec<ItemAssignment> {
    let mut ordered: Vec<&ReceiptItem> = items.iter().collect();
    ordered.sort_by_key(|item| (item.line_number, item.id));

    let mut rows = Vec::new();
    for item in ordered {
        let Some(split) = assignments.split(item.id) else {
            continue;
        };
        let values: HashMap<UserId, Decimal> = match split {
            ItemSplit::Even(_) => HashMap::new(),
            ItemSplit::Percentage(parts) => parts.iter().cloned().collect(),
            ItemSplit::Amount(parts) => parts
                .iter()
                .map(|(user, amount)| (user.clone(), amount.as_decimal()))
                .collect(),
        };
        for (user_id, calculated_amount) in split.shares(item.total_price) {
            rows.push(ItemAssignment {
                item_id: item.id,
                split_value: values.get(&user_id).copied(),
                split_type: split.split_type(),
                user_id,
                calculated_amount,
            });
        }
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonTotal {
    pub user_id: UserId,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub item_count: usize,
}

/// Result of [`calculate_person_totals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonTotals {
    pub people: Vec<PersonTotal>,
    /// Items nobody is assigned to; they contribute to nobody's total.
    pub unassigned_items: Vec<ItemId>,
    /// Sum of every item's total, assigned or not.
    pub items_subtotal: Money,
    pub assigned_subtotal: Money,
    /// Tax actually distributed; zero when nothing is assigned.
    pub tax: Money,
    /// Sum of the people's totals.
    pub grand_total: Money,
}

impl PersonTotals {
    pub fn for_user(&self, user: &UserId) -> Option<&PersonTotal> {
        self.people.iter().find(|p| &p.user_id == user)
    }

    /// True once every item is assigned and the people's totals add up to
    /// items plus tax.
    pub fn is_balanced(&self) -> bool {
        self.unassigned_items.is_empty() && self.grand_total == self.items_subtotal + self.tax
    }
}

/// Per-person subtotal, proportional tax share and total.
///
/// People are reported in `members` order; anyone assigned but missing from
/// `members` is appended in first-seen order. Tax is split over the assigned
/// subtotal; when nothing is assigned nobody is charged tax.
pub fn calculate_person_totals(
    items: &[ReceiptItem],
    assignments: &AssignmentMap,
    members: &[UserId],
    tax: Money,
) -> PersonTotals {
    let mut order: Vec<UserId> = Vec::with_capacity(members.len());
    let mut subtotals: HashMap<UserId, (Money, usize)> = HashMap::new();
    for member in members {
        if !subtotals.contains_key(member) {
            subtotals.insert(member.clone(), (Money::ZERO, 0));
            order.push(member.clone());
        }
    }

    let mut unassigned_items = Vec::new();
    let mut ordered: Vec<&ReceiptItem> = items.iter().collect();
    ordered.sort_by_key(|item| (item.line_number, item.id));
    for item in &ordered {
        let Some(split) = assignments.split(item.id).filter(|s| !s.is_empty()) else {
            unassigned_items.push(item.id);
            continue;
        };
        for (user, share) in split.shares(item.total_price) {
            let entry = subtotals.entry(user.clone()).or_insert_with(|| {
                order.push(user);
                (Money::ZERO, 0)
            });
            entry.0 += share;
            entry.1 += 1;
        }
    }

    let weights: Vec<Money> = order.iter().map(|user| subtotals[user].0).collect();
    let tax_shares = tax.allocate(&weights);

    let people: Vec<PersonTotal> = order
        .into_iter()
        .zip(tax_shares)
        .map(|(user_id, tax)| {
            let (subtotal, item_count) = subtotals[&user_id];
            PersonTotal {
                user_id,
                subtotal,
                tax,
                total: subtotal + tax,
                item_count,
            }
        })
        .collect();

    PersonTotals {
        items_subtotal: items.iter().map(|item| item.total_price).sum(),
        assigned_subtotal: people.iter().map(|p| p.subtotal).sum(),
        grand_total: people.iter().map(|p| p.total).sum(),
        tax: people.iter().map(|p| p.tax).sum(),
        unassigned_items,
        people,
    }
}

/// [`calculate_person_totals`] over everyone who appears in `assignments`.
pub fn compute_totals(items: &[ReceiptItem], assignments: &AssignmentMap, tax: Money) -> PersonTotals {
    calculate_person_totals(items, assignments, &assignments.people(), tax)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    fn money(raw: &str) -> Money {
        Money::parse(raw).unwrap()
    }

    fn item(id: u64, total: &str) -> ReceiptItem {
        ReceiptItem::new(ItemId(id), format!("item {id}"), money(total))
    }

    #[test]
    fn toggle_adds_and_removes() {
        let mut map = AssignmentMap::new();
        assert!(map.toggle_assignment(ItemId(1), user("a")));
        assert!(map.toggle_assignment(ItemId(1), user("b")));
        assert_eq!(map.assignees(ItemId(1)), vec![user("a"), user("b")]);
        assert!(!map.toggle_assignment(ItemId(1), user("a")));
        assert_eq!(map.assignees(ItemId(1)), vec![user("b")]);
        assert!(!map.toggle_assignment(ItemId(1), user("b")));
        assert!(!map.is_assigned(ItemId(1)));
        assert!(map.is_empty());
    }

    #[test]
    fn shares_are_recomputed_on_every_toggle() {
        let items = vec![item(1, "10.00")];
        let mut map = AssignmentMap::new();
        for name in ["a", "b", "c"] {
            map.toggle_assignment(ItemId(1), user(name));
        }
        let rows = format_assignments_for_api(&map, &items);
        let amounts: Vec<String> = rows.iter().map(|r| r.calculated_amount.to_string()).collect();
        assert_eq!(amounts, vec!["3.34", "3.33", "3.33"]);

        map.toggle_assignment(ItemId(1), user("c"));
        let rows = format_assignments_for_api(&map, &items);
        let amounts: Vec<String> = rows.iter().map(|r| r.calculated_amount.to_string()).collect();
        assert_eq!(amounts, vec!["5.00", "5.00"]);
    }

    #[test]
    fn single_assignee_gets_full_price() {
        let items = vec![item(1, "7.99")];
        let mut map = AssignmentMap::new();
        map.toggle_assignment(ItemId(1), user("a"));
        let rows = format_assignments_for_api(&map, &items);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].calculated_amount, money("7.99"));
        assert_eq!(rows[0].split_type, SplitType::Full);
        assert_eq!(rows[0].split_value, None);
    }

    #[test]
    fn split_evenly_covers_every_item() {
        let items = vec![item(1, "9.00"), item(2, "1.00")];
        let members = vec![user("a"), user("b"), user("c")];
        let map = AssignmentMap::split_evenly(&items, &members);
        let totals = calculate_person_totals(&items, &map, &members, Money::ZERO);
        let values: Vec<String> = totals.people.iter().map(|p| p.total.to_string()).collect();
        assert_eq!(values, vec!["3.34", "3.33", "3.33"]);
        assert!(totals.is_balanced());
    }

    #[test]
    fn worked_example_with_tax() {
        let items = vec![
            ReceiptItem::new(ItemId(1), "Pizza", money("20.00")),
            ReceiptItem::new(ItemId(2), "Soda", money("4.00")),
        ];
        let mut map = AssignmentMap::new();
        map.toggle_assignment(ItemId(1), user("alice"));
        map.toggle_assignment(ItemId(1), user("bob"));
        map.toggle_assignment(ItemId(2), user("alice"));

        let totals = calculate_person_totals(&items, &map, &[user("alice"), user("bob")], money("2.00"));
        let alice = totals.for_user(&user("alice")).unwrap();
        let bob = totals.for_user(&user("bob")).unwrap();
        assert_eq!(alice.subtotal, money("14.00"));
        assert_eq!(alice.tax, money("1.17"));
        assert_eq!(alice.total, money("15.17"));
        assert_eq!(bob.subtotal, money("10.00"));
        assert_eq!(bob.tax, money("0.83"));
        assert_eq!(bob.total, money("10.83"));
        assert_eq!(totals.grand_total, money("26.00"));
        assert!(totals.is_balanced());
    }

    #[test]
    fn zero_subtotal_means_no_tax() {
        let items = vec![item(1, "5.00")];
        let map = AssignmentMap::new();
        let totals = calculate_person_totals(&items, &map, &[user("a"), user("b")], money("1.00"));
        assert!(totals.people.iter().all(|p| p.tax.is_zero() && p.total.is_zero()));
        assert_eq!(totals.unassigned_items, vec![ItemId(1)]);
        assert!(!totals.is_balanced());
    }

    #[test]
    fn unassigned_items_are_flagged() {
        let items = vec![item(1, "5.00"), item(2, "3.00")];
        let mut map = AssignmentMap::new();
        map.toggle_assignment(ItemId(1), user("a"));
        let totals = compute_totals(&items, &map, Money::ZERO);
        assert_eq!(totals.unassigned_items, vec![ItemId(2)]);
        assert_eq!(totals.items_subtotal, money("8.00"));
        assert_eq!(totals.assigned_subtotal, money("5.00"));
    }

    #[test]
    fn assignees_outside_members_are_appended() {
        let items = vec![item(1, "6.00")];
        let mut map = AssignmentMap::new();
        map.toggle_assignment(ItemId(1), user("guest"));
        map.toggle_assignment(ItemId(1), user("a"));
        let totals = calculate_person_totals(&items, &map, &[user("a")], Money::ZERO);
        let ids: Vec<&UserId> = totals.people.iter().map(|p| &p.user_id).collect();
        assert_eq!(ids, vec![&user("a"), &user("guest")]);
        assert_eq!(totals.grand_total, money("6.00"));
    }

    #[test]
    fn percentage_split() {
        let items = vec![item(1, "10.00")];
        let mut map = AssignmentMap::new();
        map.set_percentage_split(
            ItemId(1),
            vec![(user("a"), dec!(33.333)), (user("b"), dec!(33.333)), (user("c"), dec!(33.334))],
        )
        .unwrap();
        let rows = format_assignments_for_api(&map, &items);
        let total: Money = rows.iter().map(|r| r.calculated_amount).sum();
        assert_eq!(total, money("10.00"));
        assert_eq!(rows[0].split_type, SplitType::Percentage);
        assert_eq!(rows[0].split_value, Some(dec!(33.333)));
    }

    #[test]
    fn percentage_split_must_total_100() {
        let mut map = AssignmentMap::new();
        let err = map
            .set_percentage_split(ItemId(1), vec![(user("a"), dec!(50)), (user("b"), dec!(40))])
            .unwrap_err();
        assert_eq!(
            err,
            BilloError::validation("assignments[1]", "percentages add up to 90, expected 100")
        );
    }

    #[test]
    fn amount_split_must_match_total() {
        let it = item(1, "10.00");
        let mut map = AssignmentMap::new();
        assert!(map
            .set_amount_split(&it, vec![(user("a"), money("4.00")), (user("b"), money("5.00"))])
            .is_err());
        map.set_amount_split(&it, vec![(user("a"), money("4.00")), (user("b"), money("6.00"))])
            .unwrap();
        let rows = format_assignments_for_api(&map, &[it]);
        assert_eq!(rows[1].calculated_amount, money("6.00"));
        assert_eq!(rows[1].split_value, Some(dec!(6.00)));
    }

    #[test]
    fn small_percentage_split_has_no_negative_share() {
        let items = vec![item(1, "0.05")];
        let mut map = AssignmentMap::new();
        map.set_percentage_split(
            ItemId(1),
            vec![
                (user("a"), dec!(10)),
                (user("b"), dec!(30)),
                (user("c"), dec!(30)),
                (user("d"), dec!(30)),
            ],
        )
        .unwrap();
        let rows = format_assignments_for_api(&map, &items);
        let amounts: Vec<String> = rows.iter().map(|r| r.calculated_amount.to_string()).collect();
        assert_eq!(amounts, vec!["0.00", "0.02", "0.02", "0.01"]);
    }

    #[test]
    fn stale_amount_split_is_rescaled_not_dumped_on_first() {
        let priced_at_ten = item(1, "10.00");
        let mut map = AssignmentMap::new();
        map.set_amount_split(&priced_at_ten, vec![(user("b"), money("0.00")), (user("a"), money("10.00"))])
            .unwrap();

        let repriced = item(1, "5.00");
        let shares = map.split(ItemId(1)).unwrap().shares(repriced.total_price);
        assert_eq!(shares, vec![(user("b"), money("0.00")), (user("a"), money("5.00"))]);

        let err = map.validate(&[repriced]).unwrap_err();
        assert_eq!(
            err,
            BilloError::validation("assignments[1]", "amounts add up to 10.00, expected 5.00")
        );
        assert!(map.validate(&[priced_at_ten]).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_items() {
        let mut map = AssignmentMap::new();
        map.toggle_assignment(ItemId(9), user("a"));
        assert!(matches!(
            map.validate(&[item(1, "1.00")]),
            Err(BilloError::Validation { .. })
        ));
    }

    #[test]
    fn duplicate_assignee_is_rejected() {
        let mut map = AssignmentMap::new();
        let err = map
            .set_percentage_split(ItemId(1), vec![(user("a"), dec!(50)), (user("a"), dec!(50))])
            .unwrap_err();
        assert!(matches!(err, BilloError::Validation { .. }));
    }

    #[test]
    fn toggle_discards_custom_split() {
        let mut map = AssignmentMap::new();
        map.set_percentage_split(ItemId(1), vec![(user("a"), dec!(70)), (user("b"), dec!(30))])
            .unwrap();
        map.toggle_assignment(ItemId(1), user("c"));
        assert_eq!(
            map.split(ItemId(1)),
            Some(&ItemSplit::Even(vec![user("a"), user("b"), user("c")]))
        );
    }

    #[test]
    fn rows_round_trip_through_from_rows() {
        let items = vec![item(1, "10.00"), item(2, "3.00")];
        let mut map = AssignmentMap::new();
        map.toggle_assignment(ItemId(1), user("b"));
        map.toggle_assignment(ItemId(1), user("a"));
        map.set_amount_split(&items[1], vec![(user("a"), money("1.00")), (user("c"), money("2.00"))])
            .unwrap();
        let rows = format_assignments_for_api(&map, &items);
        assert_eq!(AssignmentMap::from_rows(&rows), map);
    }
}

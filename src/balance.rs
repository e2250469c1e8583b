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

//! Net balances over settlement records.
//!
//! All functions make a single pass over the settlements they are given and
//! only count `pending` rows, except [`history`]. Amounts in different
//! currencies are never mixed.
//!
//! # Sign convention
//!
//! A **negative** net means the user is owed money; a **positive** net means
//! the user owes money.

use crate::base::{GroupId, UserId};
use crate::currency::Currency;
use crate::money::Money;
use crate::settlement::{Settlement, SettlementStatus};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A user's pending position in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    pub user_id: UserId,
    pub currency: Currency,
    /// `you_owe - owed_to_you`.
    pub net: Money,
    pub you_owe: Money,
    pub owed_to_you: Money,
    pub you_owe_count: usize,
    pub owed_to_you_count: usize,
}

impl BalanceSummary {
    pub fn is_settled_up(&self) -> bool {
        self.net.is_zero()
    }
}

/// A member's row in [`group_balances`].
pub type MemberBalance = BalanceSummary;

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    you_owe: Money,
    owed_to_you: Money,
    you_owe_count: usize,
    owed_to_you_count: usize,
}

impl Tally {
    fn owes(&mut self, amount: Money) {
        self.you_owe += amount;
        self.you_owe_count += 1;
    }

    fn is_owed(&mut self, amount: Money) {
        self.owed_to_you += amount;
        self.owed_to_you_count += 1;
    }

    fn summary(self, user_id: UserId, currency: Currency) -> BalanceSummary {
        BalanceSummary {
            user_id,
            currency,
            net: self.you_owe - self.owed_to_you,
            you_owe: self.you_owe,
            owed_to_you: self.owed_to_you,
            you_owe_count: self.you_owe_count,
            owed_to_you_count: self.owed_to_you_count,
        }
    }
}

fn pending_in(currency: Currency) -> impl Fn(&&Settlement) -> bool {
    move |s| s.status == SettlementStatus::Pending && s.currency == currency
}

/// The user's net pending balance in `currency`.
pub fn net_balance(settlements: &[Settlement], user: &UserId, currency: Currency) -> BalanceSummary {
    let mut tally = Tally::default();
    for settlement in settlements.iter().filter(pending_in(currency)) {
        if settlement.from == settlement.to {
            continue;
        }
        if &settlement.from == user {
            tally.owes(settlement.amount);
        } else if &settlement.to == user {
            tally.is_owed(settlement.amount);
        }
    }
    tally.summary(user.clone(), currency)
}

/// One summary per currency the user has pending settlements in, by currency.
pub fn net_balances(settlements: &[Settlement], user: &UserId) -> Vec<BalanceSummary> {
    let mut tallies: HashMap<Currency, Tally> = HashMap::new();
    for settlement in settlements {
        if settlement.status != SettlementStatus::Pending || settlement.from == settlement.to {
            continue;
        }
        if &settlement.from == user {
            tallies.entry(settlement.currency).or_default().owes(settlement.amount);
        } else if &settlement.to == user {
            tallies.entry(settlement.currency).or_default().is_owed(settlement.amount);
        }
    }

    let mut summaries: Vec<BalanceSummary> = tallies
        .into_iter()
        .map(|(currency, tally)| tally.summary(user.clone(), currency))
        .collect();
    summaries.sort_by_key(|summary| summary.currency);
    summaries
}

/// Every user's summaries, by user then currency, in one pass.
///
/// Users and currencies without pending settlements are left out.
pub fn all_balances(settlements: &[Settlement]) -> Vec<BalanceSummary> {
    let mut tallies: BTreeMap<(UserId, Currency), Tally> = BTreeMap::new();
    for settlement in settlements {
        if settlement.status != SettlementStatus::Pending || settlement.from == settlement.to {
            continue;
        }
        tallies
            .entry((settlement.from.clone(), settlement.currency))
            .or_default()
            .owes(settlement.amount);
        tallies
            .entry((settlement.to.clone(), settlement.currency))
            .or_default()
            .is_owed(settlement.amount);
    }

    tallies
        .into_iter()
        .map(|((user, currency), tally)| tally.summary(user, currency))
        .collect()
}

/// Per-member balances within a group.
///
/// Every entry of `members` is reported, in order, even when settled up.
/// Anyone else appearing in the group's settlements (a former member, say)
/// is appended in first-seen order.
pub fn group_balances(
    settlements: &[Settlement],
    group_id: GroupId,
    members: &[UserId],
    currency: Currency,
) -> Vec<MemberBalance> {
    let mut order: Vec<UserId> = Vec::with_capacity(members.len());
    let mut tallies: HashMap<UserId, Tally> = HashMap::new();
    for member in members {
        if tallies.insert(member.clone(), Tally::default()).is_none() {
            order.push(member.clone());
        }
    }

    let in_group = settlements
        .iter()
        .filter(pending_in(currency))
        .filter(|s| s.group_id == Some(group_id) && s.from != s.to);
    for settlement in in_group {
        for (user, owes) in [(&settlement.from, true), (&settlement.to, false)] {
            let tally = tallies.entry(user.clone()).or_insert_with(|| {
                order.push(user.clone());
                Tally::default()
            });
            if owes {
                tally.owes(settlement.amount);
            } else {
                tally.is_owed(settlement.amount);
            }
        }
    }

    order
        .into_iter()
        .map(|user| {
            let tally = tallies[&user];
            tally.summary(user, currency)
        })
        .collect()
}

/// Netted position between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairBalance {
    pub user: UserId,
    pub counterparty: UserId,
    pub currency: Currency,
    /// Positive when `user` owes `counterparty`, negative when owed.
    pub net: Money,
    /// Pending settlements between the two, either direction.
    pub settlement_count: usize,
}

impl PairBalance {
    fn new(user: UserId, counterparty: UserId, currency: Currency) -> Self {
        Self {
            user,
            counterparty,
            currency,
            net: Money::ZERO,
            settlement_count: 0,
        }
    }

    /// Who owes whom how much, or `None` when the two are even.
    pub fn direction(&self) -> Option<(&UserId, &UserId, Money)> {
        if self.net.is_zero() {
            None
        } else if self.net.is_negative() {
            Some((&self.counterparty, &self.user, self.net.abs()))
        } else {
            Some((&self.user, &self.counterparty, self.net))
        }
    }
}

/// Nets every pending settlement between `user` and `counterparty`.
///
/// If A owes B 10.00 on one receipt and B owes A 4.00 on another, the pair
/// balance is "A owes B 6.00". The settlements themselves are not touched.
pub fn pair_balance(
    settlements: &[Settlement],
    user: &UserId,
    counterparty: &UserId,
    currency: Currency,
) -> PairBalance {
    let mut pair = PairBalance::new(user.clone(), counterparty.clone(), currency);
    if user == counterparty {
        return pair;
    }
    for settlement in settlements.iter().filter(pending_in(currency)) {
        if &settlement.from == user && &settlement.to == counterparty {
            pair.net += settlement.amount;
            pair.settlement_count += 1;
        } else if &settlement.from == counterparty && &settlement.to == user {
            pair.net -= settlement.amount;
            pair.settlement_count += 1;
        }
    }
    pair
}

/// One netted [`PairBalance`] per counterparty with a non-zero position,
/// ordered by counterparty.
pub fn counterparty_balances(
    settlements: &[Settlement],
    user: &UserId,
    currency: Currency,
) -> Vec<PairBalance> {
    let mut pairs: HashMap<&UserId, PairBalance> = HashMap::new();
    for settlement in settlements.iter().filter(pending_in(currency)) {
        let (other, signed) = if &settlement.from == user {
            (&settlement.to, settlement.amount)
        } else if &settlement.to == user {
            (&settlement.from, -settlement.amount)
        } else {
            continue;
        };
        if other == user {
            continue;
        }
        let pair = pairs
            .entry(other)
            .or_insert_with(|| PairBalance::new(user.clone(), other.clone(), currency));
        pair.net += signed;
        pair.settlement_count += 1;
    }

    let mut balances: Vec<PairBalance> = pairs.into_values().filter(|p| !p.net.is_zero()).collect();
    balances.sort_by(|a, b| a.counterparty.cmp(&b.counterparty));
    balances
}

/// Pending and completed settlements involving `user`, newest first.
pub fn history(settlements: &[Settlement], user: &UserId) -> Vec<Settlement> {
    let mut rows: Vec<Settlement> = settlements
        .iter()
        .filter(|s| s.status != SettlementStatus::Cancelled && s.involves(user))
        .cloned()
        .collect();
    rows.sort_by(|a, b| {
        let a_at = a.settled_at.unwrap_or(a.created_at);
        let b_at = b.settled_at.unwrap_or(b.created_at);
        b_at.cmp(&a_at).then(b.id.cmp(&a.id))
    });
    rows
}

/// Currencies present in the settlements, ascending.
pub fn currencies(settlements: &[Settlement]) -> Vec<Currency> {
    settlements
        .iter()
        .map(|s| s.currency)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

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

//! Settlement records and their lifecycle.
//!
//! Settlements follow a state machine:
//! - [`Pending`] → [`Completed`] (mark paid)
//! - [`Completed`] → [`Pending`] (mark unpaid, a correction)
//! - [`Pending`] → [`Cancelled`] (receipt or group deleted)
//!
//! [`Cancelled`] is terminal.
//!
//! [`Pending`]: SettlementStatus::Pending
//! [`Completed`]: SettlementStatus::Completed
//! [`Cancelled`]: SettlementStatus::Cancelled

use crate::base::{GroupId, ReceiptId, SettlementId, UserId};
use crate::currency::Currency;
use crate::error::BilloError;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Completed,
    Cancelled,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementStatus::Pending => f.write_str("pending"),
            SettlementStatus::Completed => f.write_str("completed"),
            SettlementStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// `from` owes `to` an amount.
//
//  Pending ──mark paid──► Completed
//     │  ◄──mark unpaid───┘
//     └──cancel──► Cancelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub id: SettlementId,
    pub from: UserId,
    pub to: UserId,
    pub amount: Money,
    pub currency: Currency,
    pub receipt_id: Option<ReceiptId>,
    pub group_id: Option<GroupId>,
    pub status: SettlementStatus,
    pub settled_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    pub fn involves(&self, user: &UserId) -> bool {
        &self.from == user || &self.to == user
    }

    /// The other party, if `user` is one of the two.
    pub fn counterparty(&self, user: &UserId) -> Option<&UserId> {
        if &self.from == user {
            Some(&self.to)
        } else if &self.to == user {
            Some(&self.from)
        } else {
            None
        }
    }

    fn expect_status(&self, expected: SettlementStatus) -> Result<(), BilloError> {
        if self.status != expected {
            return Err(BilloError::InvalidSettlementState {
                id: self.id,
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }

    /// `pending → completed`.
    ///
    /// Either party may mark a settlement paid, as may an admin of its group.
    ///
    /// # Errors
    ///
    /// - [`BilloError::AccessDenied`] for anyone else.
    /// - [`BilloError::InvalidSettlementState`] unless currently pending.
    pub fn mark_paid(
        &mut self,
        actor: &UserId,
        actor_is_group_admin: bool,
        now: DateTime<Utc>,
    ) -> Result<(), BilloError> {
        if !self.involves(actor) && !actor_is_group_admin {
            return Err(BilloError::access_denied(format!(
                "{actor} is not a party to settlement {}",
                self.id
            )));
        }
        self.expect_status(SettlementStatus::Pending)?;
        self.status = SettlementStatus::Completed;
        self.settled_at = Some(now);
        Ok(())
    }

    /// `completed → pending`, clearing `settled_at`.
    ///
    /// Only the two parties may reverse a payment.
    ///
    /// # Errors
    ///
    /// - [`BilloError::AccessDenied`] for anyone else.
    /// - [`BilloError::InvalidSettlementState`] unless currently completed.
    pub fn mark_unpaid(&mut self, actor: &UserId) -> Result<(), BilloError> {
        if !self.involves(actor) {
            return Err(BilloError::access_denied(format!(
                "{actor} is not a party to settlement {}",
                self.id
            )));
        }
        self.expect_status(SettlementStatus::Completed)?;
        self.status = SettlementStatus::Pending;
        self.settled_at = None;
        Ok(())
    }

    /// `pending → cancelled`.
    ///
    /// # Errors
    ///
    /// [`BilloError::InvalidSettlementState`] unless currently pending.
    pub fn cancel(&mut self) -> Result<(), BilloError> {
        self.expect_status(SettlementStatus::Pending)?;
        self.status = SettlementStatus::Cancelled;
        Ok(())
    }

    /// Changes the amount of a pending settlement.
    ///
    /// # Errors
    ///
    /// [`BilloError::CompletedSettlementChanged`] if already paid, and
    /// [`BilloError::InvalidSettlementState`] if cancelled.
    pub fn reprice(&mut self, amount: Money) -> Result<(), BilloError> {
        if self.status == SettlementStatus::Completed {
            return Err(BilloError::CompletedSettlementChanged(self.id));
        }
        self.expect_status(SettlementStatus::Pending)?;
        self.amount = amount;
        Ok(())
    }
}

/// A debt before it becomes a settlement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub from: UserId,
    pub to: UserId,
    pub amount: Money,
}

/// Nets obligations per unordered user pair.
///
/// Self-obligations and pairs that cancel out are dropped. Each remaining pair
/// yields one obligation in the direction of net debt. Output is sorted by
/// `(from, to)`.
pub fn net_obligations(obligations: &[Obligation]) -> Vec<Obligation> {
    // Keyed by (low, high); positive means low owes high.
    let mut nets: BTreeMap<(&UserId, &UserId), Money> = BTreeMap::new();
    for obligation in obligations {
        if obligation.from == obligation.to {
            continue;
        }
        let (key, signed) = if obligation.from < obligation.to {
            ((&obligation.from, &obligation.to), obligation.amount)
        } else {
            ((&obligation.to, &obligation.from), -obligation.amount)
        };
        *nets.entry(key).or_insert(Money::ZERO) += signed;
    }

    let mut netted: Vec<Obligation> = nets
        .into_iter()
        .filter(|(_, net)| !net.is_zero())
        .map(|((low, high), net)| {
            if net.is_negative() {
                Obligation {
                    from: high.clone(),
                    to: low.clone(),
                    amount: net.abs(),
                }
            } else {
                Obligation {
                    from: low.clone(),
                    to: high.clone(),
                    amount: net,
                }
            }
        })
        .collect();
    netted.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
    netted
}

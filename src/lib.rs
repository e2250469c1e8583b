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

//! # Billo Core
//!
//! Settlement and balance engine for splitting receipts between group members.
//!
//! ## Core Components
//!
//! - [`Ledger`]: in-memory store and entry point for every operation
//! - [`AssignmentMap`] and [`calculate_person_totals`]: who pays for which item,
//!   with proportional tax
//! - [`Settlement`]: directional debt with a `pending → completed` lifecycle
//! - [`balance`]: net balances over settlements (negative means owed to you)
//! - [`UsageLimiter`]: fail-open sliding-window scan quota
//! - [`BilloError`]: error types shared by every operation
//!
//! ## Example
//!
//! ```
//! use billo_core::{
//!     AssignmentMap, Config, Currency, ItemInput, Ledger, Money, ReceiptInput, UserId,
//!     accept_manual,
//! };
//!
//! let ledger = Ledger::new(Config::default());
//! let alice = UserId::from("alice");
//! let bob = UserId::from("bob");
//!
//! let receipt = ledger.create_receipt(&alice, None, None).unwrap();
//! let draft = accept_manual(&ReceiptInput {
//!     merchant_name: Some("Luigi's".into()),
//!     purchase_date: Some("2025-03-01".into()),
//!     tax: Some("2.00".into()),
//!     items: vec![
//!         ItemInput::new("Pizza", "1", "20.00", "20.00"),
//!         ItemInput::new("Soda", "1", "4.00", "4.00"),
//!     ],
//!     ..Default::default()
//! })
//! .unwrap();
//! let receipt = ledger.confirm_items(&alice, receipt.id, draft).unwrap();
//!
//! let mut assignments = AssignmentMap::new();
//! assignments.toggle_assignment(receipt.items[0].id, alice.clone());
//! assignments.toggle_assignment(receipt.items[0].id, bob.clone());
//! assignments.toggle_assignment(receipt.items[1].id, alice.clone());
//! ledger.save_assignments(&alice, receipt.id, &assignments).unwrap();
//!
//! // Bob owes Alice his pizza half plus his share of the tax.
//! let balance = ledger.net_balance(&bob, Currency::Usd);
//! assert_eq!(balance.net, Money::from_cents(1083));
//! assert_eq!(ledger.net_balance(&alice, Currency::Usd).net.to_string(), "-10.83");
//! ```
//!
//! ## Thread Safety
//!
//! The ledger uses concurrent maps and per-settlement locks, so it can be
//! shared across threads behind an [`Arc`](std::sync::Arc).

pub mod assignment;
pub mod balance;
mod base;
pub mod config;
pub mod currency;
pub mod error;
pub mod group;
mod ledger;
pub mod money;
pub mod receipt;
pub mod settlement;
mod settlement_log;
pub mod usage;

pub use assignment::{
    AssignmentMap, ItemAssignment, ItemSplit, PersonTotal, PersonTotals, SplitType,
    calculate_person_totals, compute_totals, format_assignments_for_api,
};
pub use balance::{BalanceSummary, MemberBalance, PairBalance};
pub use base::{GroupId, ItemId, ReceiptId, SettlementId, Tier, User, UserId};
pub use config::{Config, ConfigError, UsageConfig};
pub use currency::{Currency, format_amount, format_decimal};
pub use error::{BilloError, ErrorKind};
pub use group::{Group, GroupMember, Role};
pub use ledger::Ledger;
pub use money::{Money, parse_amount};
pub use receipt::{
    ItemInput, RawNumber, Receipt, ReceiptDraft, ReceiptInput, ReceiptItem, ReceiptStatus,
    accept_extraction, accept_manual,
};
pub use settlement::{Obligation, Settlement, SettlementStatus, net_obligations};
pub use settlement_log::{SettlementAction, SettlementEvent, SettlementKey, SettlementLog};
pub use usage::{InMemoryUsageStore, UsageDecision, UsageLimiter, UsageSnapshot, UsageStore, WindowState};

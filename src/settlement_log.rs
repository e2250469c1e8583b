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

//! Thread-safe settlement index with an append-only audit trail.
//!
//! Guarantees one settlement per directional user pair per receipt and keeps
//! every lifecycle event in insertion order.

use crate::base::{ReceiptId, SettlementId, UserId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

/// Identity of a settlement within a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettlementKey {
    pub receipt_id: ReceiptId,
    pub from: UserId,
    pub to: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SettlementAction {
    Created { amount: Money },
    AmountChanged { from: Money, to: Money },
    Paid,
    Unpaid,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementEvent {
    pub settlement_id: SettlementId,
    #[serde(flatten)]
    pub action: SettlementAction,
    /// `None` for system cascades.
    pub actor: Option<UserId>,
    pub at: DateTime<Utc>,
}

/// Combines a [`DashMap`] for O(1) key lookup with a [`SegQueue`] of events
/// that preserves the order transitions happened in.
#[derive(Debug)]
pub struct SettlementLog {
    /// Live settlement per key; cancelled settlements are unbound.
    index: DashMap<SettlementKey, SettlementId>,

    /// Lifecycle events in FIFO order.
    events: SegQueue<SettlementEvent>,
}

impl SettlementLog {
    pub fn new() -> Self {
        Self {
            index: DashMap::new(),
            events: SegQueue::new(),
        }
    }

    /// Binds `key` to a settlement, allocating it only if the key is free.
    ///
    /// Returns the bound ID and whether it was newly allocated.
    pub fn bind(
        &self,
        key: SettlementKey,
        allocate: impl FnOnce() -> SettlementId,
    ) -> (SettlementId, bool) {
        // Entry API gives an atomic check-and-insert
        match self.index.entry(key) {
            Entry::Occupied(entry) => (*entry.get(), false),
            Entry::Vacant(entry) => {
                let id = allocate();
                entry.insert(id);
                (id, true)
            }
        }
    }

    pub fn lookup(&self, key: &SettlementKey) -> Option<SettlementId> {
        self.index.get(key).map(|id| *id)
    }

    /// Frees the key if it still points at `id`.
    pub fn unbind(&self, key: &SettlementKey, id: SettlementId) {
        self.index.remove_if(key, |_, bound| *bound == id);
    }

    /// Live settlement IDs for a receipt, ascending.
    pub fn for_receipt(&self, receipt_id: ReceiptId) -> Vec<SettlementId> {
        let mut ids: Vec<SettlementId> = self
            .index
            .iter()
            .filter(|entry| entry.key().receipt_id == receipt_id)
            .map(|entry| *entry.value())
            .collect();
        ids.sort();
        ids
    }

    pub fn record(
        &self,
        settlement_id: SettlementId,
        action: SettlementAction,
        actor: Option<&UserId>,
        at: DateTime<Utc>,
    ) {
        self.events.push(SettlementEvent {
            settlement_id,
            action,
            actor: actor.cloned(),
            at,
        });
    }

    /// Drains and returns all events recorded so far.
    pub fn drain(&self) -> Vec<SettlementEvent> {
        let mut events = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop() {
            events.push(event);
        }
        events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl Default for SettlementLog {
    fn default() -> Self {
        Self::new()
    }
}

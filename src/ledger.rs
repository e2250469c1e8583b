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

//! In-memory store for users, groups, receipts, assignments and settlements.
//!
//! The [`Ledger`] is the entry point for every mutating operation. It checks
//! who is acting, applies the change and keeps settlements in step with the
//! saved item assignments.
//!
//! # Thread Safety
//!
//! Tables are [`DashMap`]s. Each settlement sits behind its own
//! [`Mutex`] so a status change is a compare-and-set on the current status;
//! of two concurrent `mark_paid` calls exactly one succeeds.
//!
//! Lock discipline:
//!
//! - Settlement mutexes are taken in ascending ID order when more than one is
//!   held, and never while a `settlements` shard guard is alive.
//! - No `groups` guard is held while waiting on a settlement mutex.
//! - Saving assignments holds the receipt's entry guard for the whole
//!   reconciliation, which serializes saves per receipt.

use crate::assignment::{
    AssignmentMap, ItemAssignment, PersonTotals, calculate_person_totals,
    format_assignments_for_api,
};
use crate::balance::{self, BalanceSummary, MemberBalance, PairBalance};
use crate::base::{GroupId, ItemId, ReceiptId, SettlementId, Tier, User, UserId};
use crate::config::Config;
use crate::currency::Currency;
use crate::error::BilloError;
use crate::group::{Group, Role};
use crate::money::Money;
use crate::receipt::{Receipt, ReceiptDraft, ReceiptItem, ReceiptStatus};
use crate::settlement::{Obligation, Settlement, SettlementStatus, net_obligations};
use crate::settlement_log::{SettlementAction, SettlementEvent, SettlementKey, SettlementLog};
use crate::usage::{UsageDecision, UsageLimiter, UsageSnapshot, UsageStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

type SettlementHandle = Arc<Mutex<Settlement>>;

#[derive(Debug)]
struct IdSequence(AtomicU64);

impl IdSequence {
    fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Settlement core over in-memory tables.
///
/// # Invariants
///
/// - At most one live settlement per `(receipt, from, to)`.
/// - Settlements are never removed, only cancelled.
/// - Every group has at least one admin.
#[derive(Debug)]
pub struct Ledger {
    config: Config,
    users: DashMap<UserId, User>,
    groups: DashMap<GroupId, Group>,
    receipts: DashMap<ReceiptId, Receipt>,
    /// Saved rows per receipt, in item then assignee order.
    assignments: DashMap<ReceiptId, Vec<ItemAssignment>>,
    settlements: DashMap<SettlementId, SettlementHandle>,
    log: SettlementLog,
    usage: UsageLimiter,
    group_ids: IdSequence,
    receipt_ids: IdSequence,
    item_ids: IdSequence,
    settlement_ids: IdSequence,
}

impl Ledger {
    /// Creates an empty ledger with an in-memory usage store.
    pub fn new(config: Config) -> Self {
        let usage = UsageLimiter::in_memory(config.usage);
        Self::with_limiter(config, usage)
    }

    pub fn with_usage_store(config: Config, store: Arc<dyn UsageStore>) -> Self {
        let usage = UsageLimiter::new(store, config.usage);
        Self::with_limiter(config, usage)
    }

    fn with_limiter(config: Config, usage: UsageLimiter) -> Self {
        Ledger {
            config,
            users: DashMap::new(),
            groups: DashMap::new(),
            receipts: DashMap::new(),
            assignments: DashMap::new(),
            settlements: DashMap::new(),
            log: SettlementLog::new(),
            usage,
            group_ids: IdSequence::new(),
            receipt_ids: IdSequence::new(),
            item_ids: IdSequence::new(),
            settlement_ids: IdSequence::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // Users

    /// Inserts or replaces a user mirrored from the identity provider.
    pub fn upsert_user(&self, user: User) {
        debug!(user = %user.id, tier = %user.tier, "user upserted");
        self.users.insert(user.id.clone(), user);
    }

    pub fn user(&self, id: &UserId) -> Result<User, BilloError> {
        self.users
            .get(id)
            .map(|user| user.clone())
            .ok_or_else(|| BilloError::not_found("user", id))
    }

    fn tier_of(&self, id: &UserId) -> Tier {
        self.users.get(id).map(|user| user.tier).unwrap_or_default()
    }

    // Groups

    /// Creates a group with `creator` as its only admin.
    pub fn create_group(
        &self,
        creator: &UserId,
        name: &str,
        description: Option<String>,
        emoji: Option<String>,
    ) -> Result<Group, BilloError> {
        let id = GroupId(self.group_ids.next());
        let group = Group::new(id, creator.clone(), name, description, emoji, Utc::now())?;
        self.groups.insert(id, group.clone());
        info!(group = %id, creator = %creator, "group created");
        Ok(group)
    }

    /// Returns the group if `actor` is its creator or a member.
    pub fn group(&self, actor: &UserId, id: GroupId) -> Result<Group, BilloError> {
        let group = self
            .groups
            .get(&id)
            .map(|group| group.clone())
            .ok_or_else(|| BilloError::not_found("group", id))?;
        if !group.can_view(actor) {
            return Err(BilloError::access_denied(format!(
                "{actor} is not a member of group {id}"
            )));
        }
        Ok(group)
    }

    fn update_group<T>(
        &self,
        id: GroupId,
        apply: impl FnOnce(&mut Group) -> Result<T, BilloError>,
    ) -> Result<T, BilloError> {
        let mut group = self
            .groups
            .get_mut(&id)
            .ok_or_else(|| BilloError::not_found("group", id))?;
        apply(&mut *group)
    }

    pub fn add_member(
        &self,
        actor: &UserId,
        group_id: GroupId,
        user: &UserId,
        role: Role,
    ) -> Result<(), BilloError> {
        self.update_group(group_id, |group| {
            group.add_member(actor, user.clone(), role, Utc::now())
        })?;
        info!(group = %group_id, user = %user, ?role, "member added");
        Ok(())
    }

    pub fn remove_member(
        &self,
        actor: &UserId,
        group_id: GroupId,
        user: &UserId,
    ) -> Result<(), BilloError> {
        self.update_group(group_id, |group| group.remove_member(actor, user))?;
        info!(group = %group_id, user = %user, "member removed");
        Ok(())
    }

    pub fn set_role(
        &self,
        actor: &UserId,
        group_id: GroupId,
        user: &UserId,
        role: Role,
    ) -> Result<(), BilloError> {
        self.update_group(group_id, |group| group.set_role(actor, user, role))?;
        info!(group = %group_id, user = %user, ?role, "role changed");
        Ok(())
    }

    /// Deletes a group. Admin only.
    ///
    /// Pending settlements in the group are cancelled, completed ones are kept
    /// for history and the group's receipts are detached from it.
    pub fn delete_group(&self, actor: &UserId, group_id: GroupId) -> Result<(), BilloError> {
        let is_admin = self
            .groups
            .get(&group_id)
            .map(|group| group.is_admin(actor))
            .ok_or_else(|| BilloError::not_found("group", group_id))?;
        if !is_admin {
            return Err(BilloError::access_denied(format!(
                "{actor} is not an admin of group {group_id}"
            )));
        }

        let cancelled = self.cancel_pending(|s| s.group_id == Some(group_id), actor);
        let mut detached = 0;
        for mut receipt in self.receipts.iter_mut() {
            if receipt.group_id == Some(group_id) {
                receipt.group_id = None;
                detached += 1;
            }
        }
        self.groups.remove(&group_id);
        info!(group = %group_id, cancelled, detached, "group deleted");
        Ok(())
    }

    fn group_members(&self, group_id: Option<GroupId>) -> Option<Vec<UserId>> {
        group_id.and_then(|id| self.groups.get(&id).map(|group| group.member_ids()))
    }

    // Receipts

    /// Creates an empty `pending` receipt owned by `owner`.
    ///
    /// Without an explicit currency the owner's preference is used, then the
    /// configured default.
    pub fn create_receipt(
        &self,
        owner: &UserId,
        group_id: Option<GroupId>,
        currency: Option<Currency>,
    ) -> Result<Receipt, BilloError> {
        if let Some(group_id) = group_id {
            let is_member = self
                .groups
                .get(&group_id)
                .map(|group| group.is_member(owner))
                .ok_or_else(|| BilloError::not_found("group", group_id))?;
            if !is_member {
                return Err(BilloError::access_denied(format!(
                    "{owner} is not a member of group {group_id}"
                )));
            }
        }

        let currency = currency
            .or_else(|| self.users.get(owner).map(|user| user.currency))
            .unwrap_or(self.config.default_currency);
        let id = ReceiptId(self.receipt_ids.next());
        let receipt = Receipt::new(id, owner.clone(), group_id, currency, Utc::now());
        self.receipts.insert(id, receipt.clone());
        info!(receipt = %id, owner = %owner, %currency, "receipt created");
        Ok(receipt)
    }

    fn owned_receipt_mut(
        &self,
        actor: &UserId,
        id: ReceiptId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, ReceiptId, Receipt>, BilloError> {
        let receipt = self
            .receipts
            .get_mut(&id)
            .ok_or_else(|| BilloError::not_found("receipt", id))?;
        if &receipt.owner != actor {
            return Err(BilloError::access_denied(format!(
                "{actor} does not own receipt {id}"
            )));
        }
        Ok(receipt)
    }

    pub fn set_receipt_status(
        &self,
        actor: &UserId,
        id: ReceiptId,
        status: ReceiptStatus,
    ) -> Result<Receipt, BilloError> {
        let mut receipt = self.owned_receipt_mut(actor, id)?;
        let previous = receipt.status;
        receipt.transition(status)?;
        info!(receipt = %id, from = %previous, to = %status, "receipt status changed");
        Ok(receipt.clone())
    }

    /// Owner, group members and anyone assigned an item may read a receipt.
    fn can_read_receipt(&self, actor: &UserId, receipt: &Receipt) -> bool {
        if &receipt.owner == actor {
            return true;
        }
        let in_group = receipt.group_id.is_some_and(|id| {
            self.groups
                .get(&id)
                .is_some_and(|group| group.is_member(actor))
        });
        in_group
            || self
                .assignments
                .get(&receipt.id)
                .is_some_and(|rows| rows.iter().any(|row| &row.user_id == actor))
    }

    pub fn receipt(&self, actor: &UserId, id: ReceiptId) -> Result<Receipt, BilloError> {
        let receipt = self
            .receipts
            .get(&id)
            .map(|receipt| receipt.clone())
            .ok_or_else(|| BilloError::not_found("receipt", id))?;
        if !self.can_read_receipt(actor, &receipt) {
            return Err(BilloError::access_denied(format!(
                "{actor} cannot view receipt {id}"
            )));
        }
        Ok(receipt)
    }

    /// Replaces the receipt's items with a validated draft and completes it.
    ///
    /// Re-confirming identical content keeps item IDs and assignments. Any
    /// other change gets fresh item IDs, drops the saved assignments and
    /// cancels the receipt's pending settlements; the owner assigns again.
    pub fn confirm_items(
        &self,
        actor: &UserId,
        id: ReceiptId,
        draft: ReceiptDraft,
    ) -> Result<Receipt, BilloError> {
        let mut receipt = self.owned_receipt_mut(actor, id)?;
        let unchanged = same_items(&receipt.items, &draft);
        if unchanged {
            receipt.transition(ReceiptStatus::Completed)?;
            receipt.merchant_name = draft.merchant_name;
            receipt.merchant_address = draft.merchant_address;
            receipt.purchase_date = draft.purchase_date;
            receipt.set_tax(draft.tax);
            debug!(receipt = %id, "items re-confirmed unchanged");
            return Ok(receipt.clone());
        }

        receipt.apply_draft(draft, || ItemId(self.item_ids.next()))?;
        let confirmed = receipt.clone();
        drop(receipt);

        let dropped = self.assignments.remove(&id).map_or(0, |(_, rows)| rows.len());
        let cancelled = self.cancel_pending(|s| s.receipt_id == Some(id), actor);
        info!(
            receipt = %id,
            items = confirmed.items.len(),
            total = %confirmed.total,
            dropped,
            cancelled,
            "items confirmed"
        );
        Ok(confirmed)
    }

    /// Replaces the tax and recomputes the receipt total.
    ///
    /// Settlements are repriced the next time assignments are saved.
    pub fn update_tax(&self, actor: &UserId, id: ReceiptId, tax: Money) -> Result<Receipt, BilloError> {
        if tax.is_negative() {
            return Err(BilloError::validation("tax", "tax cannot be negative"));
        }
        let mut receipt = self.owned_receipt_mut(actor, id)?;
        receipt.set_tax(tax);
        debug!(receipt = %id, %tax, total = %receipt.total, "tax updated");
        Ok(receipt.clone())
    }

    /// Deletes a receipt and its assignments. Owner only.
    ///
    /// Pending settlements are cancelled; completed ones stay for history.
    pub fn delete_receipt(&self, actor: &UserId, id: ReceiptId) -> Result<(), BilloError> {
        drop(self.owned_receipt_mut(actor, id)?);
        let cancelled = self.cancel_pending(|s| s.receipt_id == Some(id), actor);
        self.assignments.remove(&id);
        self.receipts.remove(&id);
        info!(receipt = %id, cancelled, "receipt deleted");
        Ok(())
    }

    // Assignments

    /// Saves the receipt's item assignments and reconciles its settlements.
    ///
    /// Each assignee other than the owner owes the owner their total. Debts
    /// are netted per pair; existing pending settlements are repriced or
    /// cancelled to match and missing ones are created.
    ///
    /// # Errors
    ///
    /// - [`BilloError::AccessDenied`] unless `actor` owns the receipt.
    /// - [`BilloError::Validation`] for unknown items, assignees outside the
    ///   receipt's group, splits that do not fit the stored item (see
    ///   [`crate::assignment::ItemSplit::validate`]) or a negative share.
    /// - [`BilloError::CompletedSettlementChanged`] if a paid settlement
    ///   would change amount or disappear. Nothing is modified in that case.
    pub fn save_assignments(
        &self,
        actor: &UserId,
        id: ReceiptId,
        assignments: &AssignmentMap,
    ) -> Result<PersonTotals, BilloError> {
        let receipt = self.owned_receipt_mut(actor, id)?;

        let known: HashSet<ItemId> = receipt.items.iter().map(|item| item.id).collect();
        if let Some(unknown) = assignments.item_ids().find(|item| !known.contains(item)) {
            return Err(BilloError::validation(
                "itemId",
                format!("item {unknown} is not on receipt {id}"),
            ));
        }
        assignments.validate(&receipt.items)?;

        let members = self.group_members(receipt.group_id);
        if let (Some(group_id), Some(members)) = (receipt.group_id, &members) {
            if let Some(outsider) = assignments.people().into_iter().find(|user| !members.contains(user)) {
                return Err(BilloError::validation(
                    "userId",
                    format!("{outsider} is not a member of group {group_id}"),
                ));
            }
        }

        let members = members.unwrap_or_else(|| assignments.people());
        let totals = calculate_person_totals(&receipt.items, assignments, &members, receipt.tax);
        if let Some(person) = totals.people.iter().find(|person| person.total.is_negative()) {
            return Err(BilloError::validation(
                "assignments",
                format!("share for {} is negative ({})", person.user_id, person.total),
            ));
        }
        let obligations: Vec<Obligation> = totals
            .people
            .iter()
            .filter(|person| person.user_id != receipt.owner && !person.total.is_zero())
            .map(|person| Obligation {
                from: person.user_id.clone(),
                to: receipt.owner.clone(),
                amount: person.total,
            })
            .collect();

        let changes = self.reconcile(&receipt, &net_obligations(&obligations), actor)?;
        let rows = format_assignments_for_api(assignments, &receipt.items);
        self.assignments.insert(id, rows);
        drop(receipt);

        info!(
            receipt = %id,
            people = totals.people.len(),
            created = changes.created,
            repriced = changes.repriced,
            cancelled = changes.cancelled,
            "assignments saved"
        );
        Ok(totals)
    }

    /// Brings the receipt's settlements in line with `obligations`.
    ///
    /// Every bound settlement is locked (ascending ID) and checked before
    /// anything is written.
    fn reconcile(
        &self,
        receipt: &Receipt,
        obligations: &[Obligation],
        actor: &UserId,
    ) -> Result<Reconciliation, BilloError> {
        let now = Utc::now();
        let handles: Vec<SettlementHandle> = self
            .log
            .for_receipt(receipt.id)
            .into_iter()
            .filter_map(|id| self.settlements.get(&id).map(|handle| Arc::clone(handle.value())))
            .collect();
        let mut locked: Vec<_> = handles.iter().map(|handle| handle.lock()).collect();

        for settlement in &locked {
            let wanted = owed_amount(obligations, settlement);
            if settlement.status == SettlementStatus::Completed && wanted != Some(settlement.amount) {
                return Err(BilloError::CompletedSettlementChanged(settlement.id));
            }
        }

        let mut changes = Reconciliation::default();
        for settlement in locked.iter_mut() {
            if settlement.status != SettlementStatus::Pending {
                continue;
            }
            match owed_amount(obligations, settlement) {
                Some(amount) if amount == settlement.amount => {}
                Some(amount) => {
                    let previous = settlement.amount;
                    settlement.reprice(amount)?;
                    self.log.record(
                        settlement.id,
                        SettlementAction::AmountChanged { from: previous, to: amount },
                        Some(actor),
                        now,
                    );
                    debug!(settlement = %settlement.id, %previous, %amount, "settlement repriced");
                    changes.repriced += 1;
                }
                None => {
                    settlement.cancel()?;
                    self.log.unbind(&key_of(receipt.id, settlement), settlement.id);
                    self.log.record(settlement.id, SettlementAction::Cancelled, Some(actor), now);
                    debug!(settlement = %settlement.id, "settlement no longer owed");
                    changes.cancelled += 1;
                }
            }
        }

        for obligation in obligations {
            let key = SettlementKey {
                receipt_id: receipt.id,
                from: obligation.from.clone(),
                to: obligation.to.clone(),
            };
            let (id, created) = self
                .log
                .bind(key, || SettlementId(self.settlement_ids.next()));
            if !created {
                continue;
            }
            let settlement = Settlement {
                id,
                from: obligation.from.clone(),
                to: obligation.to.clone(),
                amount: obligation.amount,
                currency: receipt.currency,
                receipt_id: Some(receipt.id),
                group_id: receipt.group_id,
                status: SettlementStatus::Pending,
                settled_at: None,
                notes: None,
                created_at: now,
            };
            self.settlements.insert(id, Arc::new(Mutex::new(settlement)));
            self.log.record(
                id,
                SettlementAction::Created { amount: obligation.amount },
                Some(actor),
                now,
            );
            changes.created += 1;
        }
        Ok(changes)
    }

    /// Saved assignment rows for a receipt the actor may read.
    pub fn assignments(&self, actor: &UserId, id: ReceiptId) -> Result<Vec<ItemAssignment>, BilloError> {
        self.receipt(actor, id)?;
        Ok(self
            .assignments
            .get(&id)
            .map(|rows| rows.clone())
            .unwrap_or_default())
    }

    /// Per-person totals from the saved assignments.
    pub fn person_totals(&self, actor: &UserId, id: ReceiptId) -> Result<PersonTotals, BilloError> {
        let receipt = self.receipt(actor, id)?;
        let map = self
            .assignments
            .get(&id)
            .map(|rows| AssignmentMap::from_rows(&rows))
            .unwrap_or_default();
        let members = self
            .group_members(receipt.group_id)
            .unwrap_or_else(|| map.people());
        Ok(calculate_person_totals(&receipt.items, &map, &members, receipt.tax))
    }

    // Settlements

    fn settlement_handle(&self, id: SettlementId) -> Result<SettlementHandle, BilloError> {
        self.settlements
            .get(&id)
            .map(|handle| Arc::clone(handle.value()))
            .ok_or_else(|| BilloError::not_found("settlement", id))
    }

    fn is_group_admin(&self, group_id: Option<GroupId>, user: &UserId) -> bool {
        group_id.is_some_and(|id| self.groups.get(&id).is_some_and(|group| group.is_admin(user)))
    }

    /// Parties to the settlement and viewers of its group may read it.
    pub fn settlement(&self, actor: &UserId, id: SettlementId) -> Result<Settlement, BilloError> {
        let settlement = self.settlement_handle(id)?.lock().clone();
        let in_group = settlement.group_id.is_some_and(|group_id| {
            self.groups
                .get(&group_id)
                .is_some_and(|group| group.can_view(actor))
        });
        if !settlement.involves(actor) && !in_group {
            return Err(BilloError::access_denied(format!(
                "{actor} cannot view settlement {id}"
            )));
        }
        Ok(settlement)
    }

    /// Marks a pending settlement as paid.
    ///
    /// Either party or an admin of the settlement's group may do this. Under
    /// contention exactly one caller wins; the rest see a conflict.
    pub fn mark_paid(&self, actor: &UserId, id: SettlementId) -> Result<Settlement, BilloError> {
        let handle = self.settlement_handle(id)?;
        let group_id = handle.lock().group_id;
        let is_admin = self.is_group_admin(group_id, actor);

        let mut settlement = handle.lock();
        let now = Utc::now();
        settlement.mark_paid(actor, is_admin, now)?;
        self.log.record(id, SettlementAction::Paid, Some(actor), now);
        info!(
            settlement = %id,
            actor = %actor,
            from = %settlement.from,
            to = %settlement.to,
            amount = %settlement.amount,
            "settlement paid"
        );
        Ok(settlement.clone())
    }

    /// Reverts a completed settlement to pending. Parties only.
    pub fn mark_unpaid(&self, actor: &UserId, id: SettlementId) -> Result<Settlement, BilloError> {
        let handle = self.settlement_handle(id)?;
        let mut settlement = handle.lock();
        let paid_at = settlement.settled_at;
        settlement.mark_unpaid(actor)?;
        self.log.record(id, SettlementAction::Unpaid, Some(actor), Utc::now());
        warn!(
            settlement = %id,
            actor = %actor,
            amount = %settlement.amount,
            paid_at = ?paid_at,
            "settlement payment reversed"
        );
        Ok(settlement.clone())
    }

    /// Cancels every pending settlement matching `matches`, one lock at a time.
    fn cancel_pending(&self, matches: impl Fn(&Settlement) -> bool, actor: &UserId) -> usize {
        let now = Utc::now();
        let mut cancelled = 0;
        for handle in self.all_handles() {
            let mut settlement = handle.lock();
            if settlement.status != SettlementStatus::Pending || !matches(&*settlement) {
                continue;
            }
            if settlement.cancel().is_ok() {
                if let Some(receipt_id) = settlement.receipt_id {
                    self.log.unbind(&key_of(receipt_id, &settlement), settlement.id);
                }
                self.log.record(settlement.id, SettlementAction::Cancelled, Some(actor), now);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Clones every handle out first so no shard guard outlives the scan.
    fn all_handles(&self) -> Vec<SettlementHandle> {
        let mut handles: Vec<(SettlementId, SettlementHandle)> = self
            .settlements
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Snapshot of the settlements accepted by `keep`, by ascending ID.
    fn settlements_where(&self, keep: impl Fn(&Settlement) -> bool) -> Vec<Settlement> {
        self.all_handles()
            .iter()
            .filter_map(|handle| {
                let settlement = handle.lock();
                keep(&*settlement).then(|| settlement.clone())
            })
            .collect()
    }

    /// Every settlement, by ascending ID.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements_where(|_| true)
    }

    // Balances

    pub fn net_balance(&self, user: &UserId, currency: Currency) -> BalanceSummary {
        let rows = self.settlements_where(|s| s.involves(user));
        balance::net_balance(&rows, user, currency)
    }

    pub fn net_balances(&self, user: &UserId) -> Vec<BalanceSummary> {
        let rows = self.settlements_where(|s| s.involves(user));
        balance::net_balances(&rows, user)
    }

    /// Per-member balances. Only the group's creator and members may look.
    pub fn group_balances(
        &self,
        actor: &UserId,
        group_id: GroupId,
        currency: Currency,
    ) -> Result<Vec<MemberBalance>, BilloError> {
        let group = self.group(actor, group_id)?;
        let rows = self.settlements_where(|s| s.group_id == Some(group_id));
        Ok(balance::group_balances(&rows, group_id, &group.member_ids(), currency))
    }

    pub fn pair_balance(&self, user: &UserId, counterparty: &UserId, currency: Currency) -> PairBalance {
        let rows = self.settlements_where(|s| s.involves(user) && s.involves(counterparty));
        balance::pair_balance(&rows, user, counterparty, currency)
    }

    pub fn counterparty_balances(&self, user: &UserId, currency: Currency) -> Vec<PairBalance> {
        let rows = self.settlements_where(|s| s.involves(user));
        balance::counterparty_balances(&rows, user, currency)
    }

    pub fn history(&self, user: &UserId) -> Vec<Settlement> {
        let rows = self.settlements_where(|s| s.involves(user));
        balance::history(&rows, user)
    }

    // Usage

    /// Consumes one receipt scan from the user's quota.
    pub fn check_scan_quota(&self, user: &UserId) -> UsageDecision {
        self.usage.check_and_consume(user, self.tier_of(user))
    }

    pub fn check_scan_quota_at(&self, user: &UserId, now: DateTime<Utc>) -> UsageDecision {
        self.usage.check_and_consume_at(user, self.tier_of(user), now)
    }

    pub fn peek_scan_quota(&self, user: &UserId) -> UsageSnapshot {
        self.usage.peek_usage(user, self.tier_of(user))
    }

    /// Drains the settlement audit trail recorded since the last call.
    pub fn audit_log(&self) -> Vec<SettlementEvent> {
        self.log.drain()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Reconciliation {
    created: usize,
    repriced: usize,
    cancelled: usize,
}

fn key_of(receipt_id: ReceiptId, settlement: &Settlement) -> SettlementKey {
    SettlementKey {
        receipt_id,
        from: settlement.from.clone(),
        to: settlement.to.clone(),
    }
}

fn owed_amount(obligations: &[Obligation], settlement: &Settlement) -> Option<Money> {
    obligations
        .iter()
        .find(|o| o.from == settlement.from && o.to == settlement.to)
        .map(|o| o.amount)
}

fn same_items(existing: &[ReceiptItem], draft: &ReceiptDraft) -> bool {
    existing.len() == draft.items.len()
        && existing.iter().zip(&draft.items).all(|(item, new)| {
            item.name == new.name
                && item.quantity == new.quantity
                && item.unit_price == new.unit_price
                && item.total_price == new.total_price
                && item.line_number == new.line_number
                && item.category == new.category
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::{ItemInput, ReceiptInput, accept_manual};
    use rust_decimal_macros::dec;

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    fn draft(items: &[(&str, &str)], tax: &str) -> ReceiptDraft {
        let input = ReceiptInput {
            merchant_name: Some("Luigi's".into()),
            merchant_address: None,
            purchase_date: Some("2025-03-01".into()),
            tax: Some(tax.into()),
            total_amount: None,
            items: items
                .iter()
                .map(|(name, total)| ItemInput::new(name, "1", total, total))
                .collect(),
        };
        accept_manual(&input).unwrap()
    }

    /// Alice owns a pizza night receipt in a group with Bob.
    fn pizza_night(ledger: &Ledger) -> (GroupId, Receipt) {
        let group = ledger.create_group(&user("alice"), "Flat", None, None).unwrap();
        ledger
            .add_member(&user("alice"), group.id, &user("bob"), Role::Member)
            .unwrap();
        let receipt = ledger
            .create_receipt(&user("alice"), Some(group.id), None)
            .unwrap();
        let receipt = ledger
            .confirm_items(&user("alice"), receipt.id, draft(&[("Pizza", "20.00"), ("Soda", "4.00")], "2.00"))
            .unwrap();
        (group.id, receipt)
    }

    fn split(receipt: &Receipt) -> AssignmentMap {
        let mut map = AssignmentMap::new();
        map.toggle_assignment(receipt.items[0].id, user("alice"));
        map.toggle_assignment(receipt.items[0].id, user("bob"));
        map.toggle_assignment(receipt.items[1].id, user("alice"));
        map
    }

    #[test]
    fn saving_assignments_creates_one_settlement_per_debtor() {
        let ledger = Ledger::default();
        let (_, receipt) = pizza_night(&ledger);
        let totals = ledger
            .save_assignments(&user("alice"), receipt.id, &split(&receipt))
            .unwrap();
        assert_eq!(totals.for_user(&user("bob")).unwrap().total, Money::from_cents(1083));

        let settlements = ledger.settlements();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].from, user("bob"));
        assert_eq!(settlements[0].to, user("alice"));
        assert_eq!(settlements[0].amount, Money::from_cents(1083));

        let alice = ledger.net_balance(&user("alice"), Currency::Usd);
        assert_eq!(alice.net, Money::from_cents(-1083));
    }

    #[test]
    fn resaving_reprices_and_cancels() {
        let ledger = Ledger::default();
        let (_, receipt) = pizza_night(&ledger);
        ledger
            .save_assignments(&user("alice"), receipt.id, &split(&receipt))
            .unwrap();

        let mut map = split(&receipt);
        map.toggle_assignment(receipt.items[1].id, user("bob"));
        ledger.save_assignments(&user("alice"), receipt.id, &map).unwrap();
        let settlements = ledger.settlements();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].amount, Money::from_cents(1300));

        let alone = AssignmentMap::split_evenly(&receipt.items, &[user("alice")]);
        ledger.save_assignments(&user("alice"), receipt.id, &alone).unwrap();
        assert_eq!(ledger.settlements()[0].status, SettlementStatus::Cancelled);

        let actions: Vec<SettlementAction> = ledger.audit_log().into_iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                SettlementAction::Created { amount: Money::from_cents(1083) },
                SettlementAction::AmountChanged {
                    from: Money::from_cents(1083),
                    to: Money::from_cents(1300)
                },
                SettlementAction::Cancelled,
            ]
        );
    }

    #[test]
    fn paid_settlement_blocks_repricing() {
        let ledger = Ledger::default();
        let (_, receipt) = pizza_night(&ledger);
        ledger
            .save_assignments(&user("alice"), receipt.id, &split(&receipt))
            .unwrap();
        let id = ledger.settlements()[0].id;
        ledger.mark_paid(&user("bob"), id).unwrap();

        let mut map = split(&receipt);
        map.toggle_assignment(receipt.items[1].id, user("bob"));
        assert_eq!(
            ledger.save_assignments(&user("alice"), receipt.id, &map),
            Err(BilloError::CompletedSettlementChanged(id))
        );
        assert_eq!(ledger.settlements()[0].amount, Money::from_cents(1083));

        // Same amounts again are fine.
        ledger
            .save_assignments(&user("alice"), receipt.id, &split(&receipt))
            .unwrap();
    }

    #[test]
    fn outsiders_cannot_be_assigned() {
        let ledger = Ledger::default();
        let (group, receipt) = pizza_night(&ledger);
        let mut map = AssignmentMap::new();
        map.toggle_assignment(receipt.items[0].id, user("mallory"));
        let err = ledger
            .save_assignments(&user("alice"), receipt.id, &map)
            .unwrap_err();
        assert_eq!(
            err,
            BilloError::validation("userId", format!("mallory is not a member of group {group}"))
        );
    }

    #[test]
    fn only_the_owner_writes() {
        let ledger = Ledger::default();
        let (_, receipt) = pizza_night(&ledger);
        assert!(matches!(
            ledger.save_assignments(&user("bob"), receipt.id, &split(&receipt)),
            Err(BilloError::AccessDenied(_))
        ));
        assert!(matches!(
            ledger.update_tax(&user("bob"), receipt.id, Money::ZERO),
            Err(BilloError::AccessDenied(_))
        ));
        // Bob can still read it as a group member.
        assert!(ledger.receipt(&user("bob"), receipt.id).is_ok());
        assert!(matches!(
            ledger.receipt(&user("mallory"), receipt.id),
            Err(BilloError::AccessDenied(_))
        ));
    }

    #[test]
    fn reconfirming_same_items_is_idempotent() {
        let ledger = Ledger::default();
        let (_, receipt) = pizza_night(&ledger);
        ledger
            .save_assignments(&user("alice"), receipt.id, &split(&receipt))
            .unwrap();
        let again = ledger
            .confirm_items(&user("alice"), receipt.id, draft(&[("Pizza", "20.00"), ("Soda", "4.00")], "2.00"))
            .unwrap();
        assert_eq!(again.items, receipt.items);
        assert_eq!(again.total, Money::new(dec!(26.00)));
        assert_eq!(ledger.assignments(&user("alice"), receipt.id).unwrap().len(), 3);
    }

    #[test]
    fn changed_items_drop_assignments() {
        let ledger = Ledger::default();
        let (_, receipt) = pizza_night(&ledger);
        ledger
            .save_assignments(&user("alice"), receipt.id, &split(&receipt))
            .unwrap();
        let changed = ledger
            .confirm_items(&user("alice"), receipt.id, draft(&[("Pizza", "22.00")], "0.00"))
            .unwrap();
        assert_eq!(changed.total, Money::from_cents(2200));
        assert!(ledger.assignments(&user("alice"), receipt.id).unwrap().is_empty());
        assert_eq!(ledger.settlements()[0].status, SettlementStatus::Cancelled);
    }

    #[test]
    fn deleting_a_group_cancels_pending_and_detaches_receipts() {
        let ledger = Ledger::default();
        let (group, receipt) = pizza_night(&ledger);
        ledger
            .save_assignments(&user("alice"), receipt.id, &split(&receipt))
            .unwrap();
        assert!(matches!(
            ledger.delete_group(&user("bob"), group),
            Err(BilloError::AccessDenied(_))
        ));
        ledger.delete_group(&user("alice"), group).unwrap();

        assert_eq!(ledger.settlements()[0].status, SettlementStatus::Cancelled);
        assert_eq!(ledger.receipt(&user("alice"), receipt.id).unwrap().group_id, None);
        assert!(matches!(
            ledger.group(&user("alice"), group),
            Err(BilloError::NotFound { .. })
        ));
    }

    #[test]
    fn unknown_items_are_rejected() {
        let ledger = Ledger::default();
        let (_, receipt) = pizza_night(&ledger);
        let mut map = AssignmentMap::new();
        map.toggle_assignment(ItemId(999), user("alice"));
        assert!(matches!(
            ledger.save_assignments(&user("alice"), receipt.id, &map),
            Err(BilloError::Validation { .. })
        ));
    }

    #[test]
    fn receipt_currency_follows_user_preference() {
        let ledger = Ledger::default();
        ledger.upsert_user(User::new("eve", "Eve", "eve@example.com").with_currency(Currency::Gbp));
        let receipt = ledger.create_receipt(&user("eve"), None, None).unwrap();
        assert_eq!(receipt.currency, Currency::Gbp);
        let receipt = ledger
            .create_receipt(&user("eve"), None, Some(Currency::Jpy))
            .unwrap();
        assert_eq!(receipt.currency, Currency::Jpy);
    }
}

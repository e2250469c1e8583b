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

//! Sliding-window scan quotas.
//!
//! The limiter fails open: if the backing [`UsageStore`] errors, the request
//! is allowed with the full quota reported and a warning is logged.

use crate::base::{Tier, UserId};
use crate::config::UsageConfig;
use crate::error::BilloError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Counted events for one user inside the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Whether this call recorded a new event. Always `false` for peeks.
    pub consumed: bool,
    pub used: u32,
    pub oldest: Option<DateTime<Utc>>,
}

/// Backing store for usage events.
///
/// `consume` must be a single test-and-increment: it records an event only if
/// fewer than `limit` events fall inside `(now - window, now]`.
pub trait UsageStore: Send + Sync + fmt::Debug {
    fn consume(
        &self,
        user: &UserId,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowState, BilloError>;

    fn peek(&self, user: &UserId, window: Duration, now: DateTime<Utc>)
    -> Result<WindowState, BilloError>;
}

/// Sliding log of event timestamps per user.
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    events: Mutex<HashMap<UserId, VecDeque<DateTime<Utc>>>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with at least one event still held.
    pub fn tracked_users(&self) -> usize {
        self.events.lock().len()
    }
}

fn evict(log: &mut VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) {
    let cutoff = now - window;
    while log.front().is_some_and(|at| *at <= cutoff) {
        log.pop_front();
    }
}

impl UsageStore for InMemoryUsageStore {
    fn consume(
        &self,
        user: &UserId,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowState, BilloError> {
        let mut events = self.events.lock();
        let cutoff = now - window;
        events.retain(|_, log| log.back().is_some_and(|at| *at > cutoff));

        let log = events.entry(user.clone()).or_default();
        evict(log, window, now);

        let consumed = log.len() < limit as usize;
        if consumed {
            log.push_back(now);
        }
        let state = WindowState {
            consumed,
            used: log.len() as u32,
            oldest: log.front().copied(),
        };
        if log.is_empty() {
            events.remove(user);
        }
        Ok(state)
    }

    fn peek(
        &self,
        user: &UserId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowState, BilloError> {
        let events = self.events.lock();
        let cutoff = now - window;
        let mut counted = events
            .get(user)
            .into_iter()
            .flatten()
            .filter(|at| **at > cutoff);
        let oldest = counted.next().copied();
        let used = oldest.map_or(0, |_| 1 + counted.count() as u32);
        Ok(WindowState {
            consumed: false,
            used,
            oldest,
        })
    }
}

/// Outcome of [`UsageLimiter::check_and_consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub resets_at: DateTime<Utc>,
}

/// Outcome of [`UsageLimiter::peek_usage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub remaining: u32,
    pub used: u32,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UsageLimiter {
    store: Arc<dyn UsageStore>,
    config: UsageConfig,
}

impl UsageLimiter {
    pub fn new(store: Arc<dyn UsageStore>, config: UsageConfig) -> Self {
        Self { store, config }
    }

    pub fn in_memory(config: UsageConfig) -> Self {
        Self::new(Arc::new(InMemoryUsageStore::new()), config)
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    fn resets_at(&self, oldest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        oldest.unwrap_or(now) + self.config.window()
    }

    pub fn check_and_consume(&self, user: &UserId, tier: Tier) -> UsageDecision {
        self.check_and_consume_at(user, tier, Utc::now())
    }

    /// Records one scan if the user has quota left.
    pub fn check_and_consume_at(&self, user: &UserId, tier: Tier, now: DateTime<Utc>) -> UsageDecision {
        let limit = self.config.limit_for(tier);
        match self.store.consume(user, limit, self.config.window(), now) {
            Ok(state) => {
                debug!(user = %user, used = state.used, limit, allowed = state.consumed, "scan quota checked");
                UsageDecision {
                    allowed: state.consumed,
                    remaining: limit.saturating_sub(state.used),
                    resets_at: self.resets_at(state.oldest, now),
                }
            }
            Err(err) => {
                warn!(user = %user, error = %err, "usage store failed, allowing scan");
                UsageDecision {
                    allowed: true,
                    remaining: limit,
                    resets_at: now + self.config.window(),
                }
            }
        }
    }

    pub fn peek_usage(&self, user: &UserId, tier: Tier) -> UsageSnapshot {
        self.peek_usage_at(user, tier, Utc::now())
    }

    /// Reports quota without recording anything.
    pub fn peek_usage_at(&self, user: &UserId, tier: Tier, now: DateTime<Utc>) -> UsageSnapshot {
        let limit = self.config.limit_for(tier);
        match self.store.peek(user, self.config.window(), now) {
            Ok(state) => UsageSnapshot {
                remaining: limit.saturating_sub(state.used),
                used: state.used,
                resets_at: self.resets_at(state.oldest, now),
            },
            Err(err) => {
                warn!(user = %user, error = %err, "usage store failed, reporting full quota");
                UsageSnapshot {
                    remaining: limit,
                    used: 0,
                    resets_at: now + self.config.window(),
                }
            }
        }
    }
}

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

//! Groups and membership.
//!
//! A group is created together with its first admin, and every mutation below
//! keeps at least one admin in place.

use crate::base::{GroupId, UserId};
use crate::error::BilloError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user_id: UserId,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub emoji: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    members: Vec<GroupMember>,
}

impl Group {
    /// Creates a group whose creator is its sole admin.
    ///
    /// # Errors
    ///
    /// Returns [`BilloError::Validation`] for an empty or overlong name.
    pub fn new(
        id: GroupId,
        creator: UserId,
        name: &str,
        description: Option<String>,
        emoji: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, BilloError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BilloError::validation("name", "group name is required"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(BilloError::validation(
                "name",
                format!("group name exceeds {MAX_NAME_LEN} characters"),
            ));
        }

        Ok(Self {
            id,
            name: name.to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            emoji,
            members: vec![GroupMember {
                user_id: creator.clone(),
                role: Role::Admin,
                joined_at: now,
            }],
            created_by: creator,
            created_at: now,
        })
    }

    pub fn members(&self) -> &[GroupMember] {
        &self.members
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.user_id.clone()).collect()
    }

    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        self.members
            .iter()
            .find(|m| &m.user_id == user)
            .map(|m| m.role)
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.role_of(user).is_some()
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.role_of(user) == Some(Role::Admin)
    }

    /// Creator or member; used for read access to balances.
    pub fn can_view(&self, user: &UserId) -> bool {
        &self.created_by == user || self.is_member(user)
    }

    fn admin_count(&self) -> usize {
        self.members.iter().filter(|m| m.role == Role::Admin).count()
    }

    fn require_admin(&self, actor: &UserId) -> Result<(), BilloError> {
        if self.is_admin(actor) {
            Ok(())
        } else {
            Err(BilloError::access_denied(format!(
                "{actor} is not an admin of group {}",
                self.id
            )))
        }
    }

    /// # Errors
    ///
    /// Access denied unless `actor` is an admin; validation error if `user`
    /// already belongs to the group.
    pub fn add_member(
        &mut self,
        actor: &UserId,
        user: UserId,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<(), BilloError> {
        self.require_admin(actor)?;
        if self.is_member(&user) {
            return Err(BilloError::validation(
                "userId",
                format!("{user} is already a member"),
            ));
        }
        self.members.push(GroupMember {
            user_id: user,
            role,
            joined_at: now,
        });
        Ok(())
    }

    /// Admins may remove anyone; members may only remove themselves.
    ///
    /// # Errors
    ///
    /// [`BilloError::LastAdmin`] if `user` is the only admin.
    pub fn remove_member(&mut self, actor: &UserId, user: &UserId) -> Result<(), BilloError> {
        if actor != user {
            self.require_admin(actor)?;
        }
        let index = self
            .members
            .iter()
            .position(|m| &m.user_id == user)
            .ok_or_else(|| BilloError::not_found("member", user))?;
        if self.members[index].role == Role::Admin && self.admin_count() == 1 {
            return Err(BilloError::LastAdmin);
        }
        self.members.remove(index);
        Ok(())
    }

    /// # Errors
    ///
    /// [`BilloError::LastAdmin`] when demoting the only admin.
    pub fn set_role(&mut self, actor: &UserId, user: &UserId, role: Role) -> Result<(), BilloError> {
        self.require_admin(actor)?;
        let is_last_admin = self.admin_count() == 1;
        let member = self
            .members
            .iter_mut()
            .find(|m| &m.user_id == user)
            .ok_or_else(|| BilloError::not_found("member", user))?;
        if member.role == Role::Admin && role == Role::Member && is_last_admin {
            return Err(BilloError::LastAdmin);
        }
        member.role = role;
        Ok(())
    }
}

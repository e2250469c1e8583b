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

//! Error types for the settlement core.

use crate::base::SettlementId;
use crate::receipt::ReceiptStatus;
use crate::settlement::SettlementStatus;
use thiserror::Error;

/// Broad classification of a [`BilloError`], used by callers to pick a reaction
/// (fix input, refresh and retry, give up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Conflict,
    NotFound,
    Unavailable,
}

/// Settlement core errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BilloError {
    /// A field failed validation
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Amount is not a 2-decimal non-negative number
    #[error("invalid amount {0:?} (expected digits with exactly two decimals)")]
    InvalidAmount(String),

    /// Currency code is not in the supported set
    #[error("unsupported currency code {0:?}")]
    UnknownCurrency(String),

    /// Actor may not perform the operation
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Settlement is not in the status the transition expects
    #[error("settlement {id} is {actual}, expected {expected}")]
    InvalidSettlementState {
        id: SettlementId,
        expected: SettlementStatus,
        actual: SettlementStatus,
    },

    /// Re-saving assignments would rewrite a settlement that was already paid
    #[error("settlement {0} is already completed and cannot change amount")]
    CompletedSettlementChanged(SettlementId),

    /// Receipt status change is not allowed
    #[error("receipt cannot move from {from} to {to}")]
    InvalidReceiptTransition { from: ReceiptStatus, to: ReceiptStatus },

    /// Group would be left without an admin
    #[error("the last admin of a group cannot be removed or demoted")]
    LastAdmin,

    /// Referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Usage counter store could not be reached
    #[error("usage store unavailable: {0}")]
    StoreUnavailable(String),
}

impl BilloError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied(reason.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::InvalidAmount(_) | Self::UnknownCurrency(_) => {
                ErrorKind::Validation
            }
            Self::AccessDenied(_) => ErrorKind::Authorization,
            Self::InvalidSettlementState { .. }
            | Self::CompletedSettlementChanged(_)
            | Self::InvalidReceiptTransition { .. }
            | Self::LastAdmin => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StoreUnavailable(_) => ErrorKind::Unavailable,
        }
    }
}

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

//! Runtime configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! default_currency = "EUR"
//!
//! [usage]
//! free_daily_scans = 3
//! pro_daily_scans = 50
//! window_hours = 24
//! ```

use crate::base::Tier;
use crate::currency::Currency;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Currency for new receipts when the owner has no preference.
    pub default_currency: Currency,
    pub usage: UsageConfig,
}

/// Scan quotas per tier over a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UsageConfig {
    pub free_daily_scans: u32,
    pub pro_daily_scans: u32,
    pub window_hours: u32,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            free_daily_scans: 3,
            pro_daily_scans: 50,
            window_hours: 24,
        }
    }
}

impl UsageConfig {
    pub fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free_daily_scans,
            Tier::Pro => self.pro_daily_scans,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::hours(i64::from(self.window_hours))
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

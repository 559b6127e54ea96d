// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::DbError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Sentinel for `max_write_connections` meaning "no separate write pool".
pub const MERGED_POOLS: i32 = -1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Store file. `None` opens a private in-memory store.
    pub path: Option<PathBuf>,
    /// Cap on the read pool (or the single pool, when merged).
    pub max_connections: i32,
    /// Cap on the write pool; `-1` merges read and write connections into one pool.
    pub max_write_connections: i32,
    /// Back-off for contended `BEGIN` / `COMMIT` / `ROLLBACK`.
    pub retry: RetryPolicy,
    /// SQLite's own busy handler. Zero leaves contention entirely to `retry`.
    #[serde(with = "millis")]
    pub busy_timeout: Duration,
    pub journal_mode: String,
    /// Prepared statements kept per connection.
    pub statement_cache_capacity: usize,
    /// How many fresh random ids to try before giving up on inserting an object.
    pub max_id_attempts: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 4,
            max_write_connections: MERGED_POOLS,
            retry: RetryPolicy::default(),
            busy_timeout: Duration::ZERO,
            journal_mode: "WAL".to_string(),
            statement_cache_capacity: 256,
            max_id_attempts: 16,
        }
    }
}

/// How connections are split between pools.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoolLayout {
    Merged { max: usize },
    Split { read: usize, write: usize },
}

impl DatabaseConfig {
    pub fn pool_layout(&self) -> Result<PoolLayout, DbError> {
        if self.max_connections <= 0 {
            return Err(DbError::Config(format!(
                "max_connections must be positive, got {}",
                self.max_connections
            )));
        }
        let read = self.max_connections as usize;
        match self.max_write_connections {
            MERGED_POOLS => Ok(PoolLayout::Merged { max: read }),
            w if w > 0 => Ok(PoolLayout::Split {
                read,
                write: w as usize,
            }),
            w => Err(DbError::Config(format!(
                "max_write_connections must be positive or {MERGED_POOLS}, got {w}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_step: Duration,
    /// After this many attempts the increment switches to `widened_step`.
    pub widen_after: u32,
    #[serde(with = "millis")]
    pub widened_step: Duration,
    /// Add a random delay of up to one step to each wait.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            base_step: Duration::from_millis(10),
            widen_after: 20,
            widened_step: Duration::from_millis(100),
            jitter: true,
        }
    }
}

/// Durations are written as integer milliseconds in config files.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_merged() {
        assert_eq!(
            DatabaseConfig::default().pool_layout().unwrap(),
            PoolLayout::Merged { max: 4 }
        );
    }

    #[test]
    fn test_split_layout() {
        let config = DatabaseConfig {
            max_connections: 8,
            max_write_connections: 1,
            ..Default::default()
        };
        assert_eq!(
            config.pool_layout().unwrap(),
            PoolLayout::Split { read: 8, write: 1 }
        );
    }

    #[test]
    fn test_invalid_layouts_rejected() {
        for (read, write) in [(0, -1), (4, 0), (4, -2), (-3, 2)] {
            let config = DatabaseConfig {
                max_connections: read,
                max_write_connections: write,
                ..Default::default()
            };
            assert!(
                matches!(config.pool_layout(), Err(DbError::Config(_))),
                "{read}/{write} should be rejected"
            );
        }
    }
}

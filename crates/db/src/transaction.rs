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

//! Transaction control with retry on writer-lock contention.

use crate::config::RetryPolicy;
use crate::{DbError, Gateway};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TxMode {
    /// Take the writer lock at `BEGIN`.
    Immediate,
    /// A read transaction; drawn from the read pool when the pools are split.
    Deferred,
}

impl TxMode {
    fn begin_sql(&self) -> &'static str {
        match self {
            TxMode::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            TxMode::Deferred => "BEGIN DEFERRED TRANSACTION",
        }
    }
}

/// Forces a deferred transaction to take its shared lock at `begin`.
const SHARED_LOCK_SQL: &str = "SELECT count(*) FROM sqlite_master";

/// Widening waits between attempts of a contended statement.
///
/// Each wait grows by one step over the previous one; the step is `base_step` for the first
/// `widen_after` attempts and `widened_step` afterwards. Jitter adds up to one further step.
pub(crate) struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    wait: Duration,
}

impl<'a> Backoff<'a> {
    pub(crate) fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            wait: Duration::ZERO,
        }
    }

    /// Attempts made so far.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt; the time to sleep before the next one, or `None` once the
    /// attempt budget is spent.
    pub(crate) fn next_wait(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let step = if self.attempts > self.policy.widen_after {
            self.policy.widened_step
        } else {
            self.policy.base_step
        };
        self.wait += step;
        let jitter = if self.policy.jitter {
            let step_ms = step.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=step_ms))
        } else {
            Duration::ZERO
        };
        Some(self.wait + jitter)
    }
}

impl Gateway {
    /// Run `op` until it succeeds, fails with a non-contention error, or the retry budget runs
    /// out. Garbage collection is permitted while sleeping.
    fn retrying(
        &self,
        sql: &str,
        mut op: impl FnMut() -> Result<(), DbError>,
    ) -> Result<(), DbError> {
        let policy = &self.db.config().retry;
        let mut backoff = Backoff::new(policy);
        loop {
            let err = match op() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_contention() => e,
                Err(e) => return Err(e),
            };
            let Some(wait) = backoff.next_wait() else {
                warn!(sql, attempts = backoff.attempts(), "Giving up on contended statement");
                return match err {
                    DbError::Sql { source, .. } => Err(DbError::Contention {
                        sql: sql.to_string(),
                        attempts: backoff.attempts(),
                        source,
                    }),
                    other => Err(other),
                };
            };
            debug!(sql, attempt = backoff.attempts(), ?wait, "Store busy, retrying");
            self.allow_gc();
            std::thread::sleep(wait);
            self.disallow_gc();
        }
    }

    /// Open a transaction and keep this gateway's connection claimed until `commit` or
    /// `rollback` succeeds. Transactions do not nest: a gateway that already holds a connection
    /// is refused, since that connection came from the pool its first claim chose.
    pub fn begin(&self, mode: TxMode) -> Result<(), DbError> {
        let depth = self.ownership_depth();
        if depth > 0 {
            return Err(DbError::TransactionOpen { depth });
        }
        self.read_only_tx.set(mode == TxMode::Deferred);
        self.acquire()?;
        let sql = mode.begin_sql();
        let begun = self.with_connection(|conn| {
            self.retrying(sql, || {
                conn.execute_batch(sql)?;
                if mode == TxMode::Deferred
                    && let Err(e) = conn.query_opt(SHARED_LOCK_SQL, &[], |_| Ok(()))
                {
                    conn.execute_batch("ROLLBACK")?;
                    return Err(e);
                }
                Ok(())
            })
        });
        if begun.is_err() {
            self.release();
        }
        begun
    }

    /// Commit, then return the connection to the pool. On failure the connection stays claimed
    /// so the caller can retry or roll back.
    pub fn commit(&self) -> Result<(), DbError> {
        self.finish("COMMIT")?;
        self.settle_created_tables(true);
        Ok(())
    }

    pub fn rollback(&self) -> Result<(), DbError> {
        self.finish("ROLLBACK")?;
        self.settle_created_tables(false);
        Ok(())
    }

    fn finish(&self, sql: &str) -> Result<(), DbError> {
        self.with_connection(|conn| self.retrying(sql, || conn.execute_batch(sql)))?;
        self.release();
        Ok(())
    }

    /// Run `f` inside a transaction, committing on success and rolling back on error.
    pub fn transaction<T>(
        &self,
        mode: TxMode,
        f: impl FnOnce(&Gateway) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        self.begin(mode)?;
        match f(self) {
            Ok(v) => {
                self.commit()?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(error = %rollback_err, "Rollback after failed transaction also failed");
                }
                Err(e)
            }
        }
    }
}

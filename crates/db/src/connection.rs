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

use crate::{DatabaseConfig, DbError};
use rusqlite::{CachedStatement, Row, params_from_iter};
use std::path::PathBuf;
use tracing::{debug, trace};

pub use rusqlite::types::Value as SqlValue;

/// Where connections are opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    File(PathBuf),
    /// A private in-memory store. Every connection would see a different database, so pools
    /// over this target hold exactly one connection.
    InMemory,
}

/// One physical connection, owned by exactly one gateway while it is out of the pool.
///
/// Statements are prepared through rusqlite's per-connection statement cache, keyed by SQL text,
/// which is why the pool hands connections out LIFO.
pub struct Connection {
    id: usize,
    read_only: bool,
    conn: rusqlite::Connection,
}

impl Connection {
    pub(crate) fn open(
        target: &StoreTarget,
        id: usize,
        read_only: bool,
        config: &DatabaseConfig,
    ) -> Result<Self, DbError> {
        let conn = match target {
            StoreTarget::File(path) => {
                rusqlite::Connection::open(path).map_err(|source| DbError::Open {
                    path: path.display().to_string(),
                    source,
                })?
            }
            StoreTarget::InMemory => {
                rusqlite::Connection::open_in_memory().map_err(|source| DbError::Open {
                    path: ":memory:".to_string(),
                    source,
                })?
            }
        };
        conn.busy_timeout(config.busy_timeout)
            .map_err(DbError::sql("PRAGMA busy_timeout"))?;
        conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
        if let StoreTarget::File(_) = target {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", &config.journal_mode, |row| {
                    row.get(0)
                })
                .map_err(DbError::sql("PRAGMA journal_mode"))?;
            if !mode.eq_ignore_ascii_case(&config.journal_mode) {
                debug!(id, requested = %config.journal_mode, %mode, "Journal mode not honoured");
            }
        }
        debug!(id, read_only, ?target, "Opened store connection");
        Ok(Self {
            id,
            read_only,
            conn,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether this connection belongs to the read pool of a split pool.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// A prepared statement for `sql`, reused if this connection has prepared it before.
    pub fn prepare(&self, sql: &str) -> Result<CachedStatement<'_>, DbError> {
        trace!(conn = self.id, sql, "prepare");
        self.conn.prepare_cached(sql).map_err(DbError::sql(sql))
    }

    /// Run a statement, returning the number of rows changed.
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, DbError> {
        let mut stmt = self.prepare(sql)?;
        stmt.execute(params_from_iter(params.iter()))
            .map_err(DbError::sql(sql))
    }

    pub fn query<T>(
        &self,
        sql: &str,
        params: &[SqlValue],
        mut map: impl FnMut(&Row<'_>) -> Result<T, DbError>,
    ) -> Result<Vec<T>, DbError> {
        let mut stmt = self.prepare(sql)?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(DbError::sql(sql))?;
        let mut results = vec![];
        while let Some(row) = rows.next().map_err(DbError::sql(sql))? {
            results.push(map(row)?);
        }
        Ok(results)
    }

    /// The first row of a query, if any.
    pub fn query_opt<T>(
        &self,
        sql: &str,
        params: &[SqlValue],
        map: impl FnOnce(&Row<'_>) -> Result<T, DbError>,
    ) -> Result<Option<T>, DbError> {
        let mut stmt = self.prepare(sql)?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(DbError::sql(sql))?;
        match rows.next().map_err(DbError::sql(sql))? {
            Some(row) => Ok(Some(map(row)?)),
            None => Ok(None),
        }
    }

    /// Run unprepared statements, e.g. transaction control and DDL.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        trace!(conn = self.id, sql, "batch");
        self.conn.execute_batch(sql).map_err(DbError::sql(sql))
    }

    /// True when no transaction is open on this connection.
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }
}

/// Read column `idx` as a plain rusqlite type, wrapping failures as decode errors.
pub(crate) fn column<T: rusqlite::types::FromSql>(row: &Row<'_>, idx: usize) -> Result<T, DbError> {
    row.get(idx).map_err(|e| DbError::Decode {
        column: idx.to_string(),
        message: e.to_string(),
    })
}

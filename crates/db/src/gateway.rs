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

//! Per-interpreter-thread access to the store.

use crate::connection::Connection;
use crate::database::Database;
use crate::pool::ConnectionPool;
use crate::DbError;
use mica_common::{InterpThread, Object};
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use tracing::warn;

struct Held {
    pool: Arc<ConnectionPool>,
    conn: Connection,
}

/// The storage façade of one interpreter thread.
///
/// A gateway claims a single connection for the duration of one high-level operation and
/// re-enters that claim for any nested operation, so that everything issued inside one
/// transaction runs on one connection in program order. Only the outermost claim touches the
/// pool.
pub struct Gateway {
    pub(crate) db: Database,
    thread: Option<Arc<dyn InterpThread>>,
    held: RefCell<Option<Held>>,
    depth: Cell<usize>,
    acquiring: Cell<bool>,
    pub(crate) read_only_tx: Cell<bool>,
    /// Tables created inside the open transaction, recorded as known once it commits.
    pub(crate) created_tables: RefCell<Vec<String>>,
    /// Objects newly persisted under the outermost open `ensure_persisted`.
    pub(crate) persisting: RefCell<Vec<Object>>,
    /// Nesting of `ensure_persisted` savepoints.
    pub(crate) persist_depth: Cell<usize>,
}

/// Releases one level of ownership on drop.
struct Ownership<'a>(&'a Gateway);

impl Drop for Ownership<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl Gateway {
    pub(crate) fn new(db: Database, thread: Option<Arc<dyn InterpThread>>) -> Self {
        Self {
            db,
            thread,
            held: RefCell::new(None),
            depth: Cell::new(0),
            acquiring: Cell::new(false),
            read_only_tx: Cell::new(false),
            created_tables: RefCell::new(Vec::new()),
            persisting: RefCell::new(Vec::new()),
            persist_depth: Cell::new(0),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub(crate) fn allow_gc(&self) {
        if let Some(thread) = &self.thread {
            thread.allow_gc();
        }
    }

    pub(crate) fn disallow_gc(&self) {
        if let Some(thread) = &self.thread {
            thread.disallow_gc();
        }
    }

    /// Current nesting depth of connection ownership.
    pub fn ownership_depth(&self) -> usize {
        self.depth.get()
    }

    pub fn holds_connection(&self) -> bool {
        self.held.borrow().is_some()
    }

    /// Take (or re-enter) ownership of a connection. On the outermost entry the connection is
    /// drawn from the write or read pool according to the current transaction type, with
    /// garbage collection permitted while the pool blocks.
    pub fn acquire(&self) -> Result<(), DbError> {
        if self.acquiring.get() {
            return Err(DbError::Reentrant);
        }
        if self.depth.get() > 0 {
            self.depth.set(self.depth.get() + 1);
            return Ok(());
        }
        self.acquiring.set(true);
        let grabbed = self.db.pool().and_then(|pool| {
            self.allow_gc();
            let conn = pool.grab(!self.read_only_tx.get());
            self.disallow_gc();
            conn.map(|conn| Held { pool, conn })
        });
        self.acquiring.set(false);
        *self.held.borrow_mut() = Some(grabbed?);
        self.depth.set(1);
        Ok(())
    }

    /// Drop one level of ownership. Returns true iff this returned the connection to the pool.
    pub fn release(&self) -> bool {
        match self.depth.get() {
            0 => false,
            1 => {
                self.depth.set(0);
                self.read_only_tx.set(false);
                match self.held.borrow_mut().take() {
                    Some(Held { pool, conn }) => {
                        pool.release(conn);
                        true
                    }
                    None => false,
                }
            }
            n => {
                self.depth.set(n - 1);
                false
            }
        }
    }

    /// Run `f` on this gateway's connection, holding ownership for the duration.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        self.acquire()?;
        let _ownership = Ownership(self);
        let held = self.held.borrow();
        let Some(held) = held.as_ref() else {
            return Err(DbError::Integrity(
                "gateway owns no connection after acquiring".to_string(),
            ));
        };
        f(&held.conn)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(Held { pool, conn }) = self.held.get_mut().take() {
            if !conn.is_autocommit()
                && let Err(e) = conn.execute_batch("ROLLBACK")
            {
                warn!(error = %e, "Failed to roll back abandoned transaction");
            }
            pool.release(conn);
        }
    }
}

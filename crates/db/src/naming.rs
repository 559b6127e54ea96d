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

//! Dubbed names: the externally visible roots of persistence.

use crate::connection::{Connection, SqlValue, column};
use crate::error::NotFound;
use crate::{DbError, Gateway};
use mica_common::{Identity, Object};
use tracing::debug;

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn name_holder(conn: &Connection, name: &str) -> Result<Option<i64>, DbError> {
    conn.query_opt("SELECT id FROM Name WHERE name = ?", &[text(name)], |row| {
        column::<i64>(row, 0)
    })
}

fn stored_name(conn: &Connection, id: i64) -> Result<Option<String>, DbError> {
    conn.query_opt(
        "SELECT name FROM Name WHERE id = ?",
        &[SqlValue::Integer(id)],
        |row| column::<String>(row, 0),
    )
}

impl Gateway {
    /// Name `obj`, persisting it (and everything reachable from it) first.
    ///
    /// An object carries at most one name and a name denotes one object. Dubbing an object
    /// again under the name it already has is a no-op; a name held by another object fails
    /// with `NameInUse`, and a second name for `obj` fails with `AlreadyNamed` (use `rename`).
    /// Nothing is persisted when the name is refused.
    pub fn dub(&self, obj: &Object, name: &str) -> Result<i64, DbError> {
        self.with_connection(|conn| {
            let current = obj.db_id().filter(|_| obj.is_stored());
            if let Some(holder) = name_holder(conn, name)? {
                if current == Some(holder) {
                    return Ok(holder);
                }
                return Err(DbError::NameInUse {
                    name: name.to_string(),
                    holder,
                });
            }
            if let Some(id) = current
                && let Some(existing) = stored_name(conn, id)?
            {
                return Err(DbError::AlreadyNamed { id, name: existing });
            }
            let id = self.ensure_persisted(obj)?;
            conn.execute(
                "INSERT INTO Name (name, id) VALUES (?, ?)",
                &[text(name), SqlValue::Integer(id)],
            )?;
            debug!(name, id, "Dubbed object");
            Ok(id)
        })
    }

    /// Move the name `from` to `to`. Returns false if `from` was not in use; fails with
    /// `NameInUse` if `to` already names an object.
    pub fn rename(&self, from: &str, to: &str) -> Result<bool, DbError> {
        self.with_connection(|conn| {
            let Some(id) = name_holder(conn, from)? else {
                return Ok(false);
            };
            if from == to {
                return Ok(true);
            }
            if let Some(holder) = name_holder(conn, to)? {
                return Err(DbError::NameInUse {
                    name: to.to_string(),
                    holder,
                });
            }
            conn.execute(
                "UPDATE Name SET name = ? WHERE name = ?",
                &[text(to), text(from)],
            )?;
            debug!(from, to, id, "Renamed object");
            Ok(true)
        })
    }

    pub fn exists(&self, name: &str) -> Result<bool, DbError> {
        self.with_connection(|conn| {
            let found = conn.query_opt("SELECT 1 FROM Name WHERE name = ?", &[text(name)], |_| Ok(()))?;
            Ok(found.is_some())
        })
    }

    /// Every name starting with `prefix`, sorted.
    pub fn names(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        self.with_connection(|conn| {
            conn.query(
                "SELECT name FROM Name WHERE substr(name, 1, length(?1)) = ?1 ORDER BY name",
                &[text(prefix)],
                |row| column::<String>(row, 0),
            )
        })
    }

    /// The object dubbed `name`, fetched through the same pipeline as `fetch`.
    pub fn fetch_by_name(&self, name: &str, radius: u32) -> Result<Object, DbError> {
        self.with_connection(|conn| {
            let row = conn.query_opt(
                "SELECT o.id, o.id2, o.flags, o.typeName FROM Name n \
                 JOIN Object o ON o.id = n.id WHERE n.name = ?",
                &[text(name)],
                |row| {
                    Ok((
                        column::<i64>(row, 0)?,
                        column::<i64>(row, 1)?,
                        column::<i64>(row, 2)?,
                        column::<String>(row, 3)?,
                    ))
                },
            )?;
            let Some((id, id2, flags, type_name)) = row else {
                return Err(DbError::NotFound(NotFound::Name(name.to_string())));
            };
            if let Some(obj) = self.db.cache().get(id) {
                return Ok(obj);
            }
            self.materialize(conn, Identity::from_row(id, id2, flags), &type_name, radius)
        })
    }

    /// Drop a name. The object stays persistent.
    pub fn unname(&self, name: &str) -> Result<bool, DbError> {
        self.with_connection(|conn| {
            Ok(conn.execute("DELETE FROM Name WHERE name = ?", &[text(name)])? > 0)
        })
    }

    /// The name `obj` is dubbed under, if any.
    pub fn name_of(&self, obj: &Object) -> Result<Option<String>, DbError> {
        let Some(id) = obj.db_id().filter(|_| obj.is_stored()) else {
            return Ok(None);
        };
        self.with_connection(|conn| stored_name(conn, id))
    }
}

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

//! Store-wide housekeeping over the relation tables recorded in `Relation`.

use crate::collection_codec::{RelationTable, Target};
use crate::connection::{Connection, SqlValue, column};
use crate::{DbError, Gateway};
use tracing::info;

impl Gateway {
    fn relation_tables(&self, conn: &Connection) -> Result<Vec<RelationTable>, DbError> {
        let rows = conn.query("SELECT name, descriptor FROM Relation ORDER BY name", &[], |row| {
            Ok((column::<String>(row, 0)?, column::<String>(row, 1)?))
        })?;
        rows.iter()
            .map(|(name, descriptor)| RelationTable::from_descriptor(name, descriptor))
            .collect()
    }

    /// Delete relation rows whose target object no longer exists, then close the gaps this
    /// leaves in positional tables. Returns the number of rows deleted.
    pub fn sweep_dangling_references(&self) -> Result<usize, DbError> {
        self.with_connection(|conn| {
            let mut swept = 0;
            for table in self.relation_tables(conn)? {
                if !table.holds_refs() {
                    continue;
                }
                let deleted = conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE id1 NOT IN (SELECT id FROM Object)",
                        table.quoted()
                    ),
                    &[],
                )?;
                if deleted > 0 && table.is_positional() {
                    self.renumber(conn, &table)?;
                }
                swept += deleted;
            }
            info!(swept, "Swept dangling references");
            Ok(swept)
        })
    }

    /// Rewrite `ord1` as `0..n-1` per owner, keeping the existing order.
    fn renumber(&self, conn: &Connection, table: &RelationTable) -> Result<(), DbError> {
        let owner = table.owner_col();
        let rows = conn.query(
            &format!(
                "SELECT rowid, {owner} FROM {} ORDER BY {owner}, ord1",
                table.quoted()
            ),
            &[],
            |row| Ok((column::<i64>(row, 0)?, column::<i64>(row, 1)?)),
        )?;
        let update = format!("UPDATE {} SET ord1 = ? WHERE rowid = ?", table.quoted());
        let mut current = None;
        let mut next = 0i64;
        for (rowid, owner_id) in rows {
            if current != Some(owner_id) {
                current = Some(owner_id);
                next = 0;
            }
            conn.execute(&update, &[SqlValue::Integer(next), SqlValue::Integer(rowid)])?;
            next += 1;
        }
        Ok(())
    }

    /// Whether the `ord1` values of `owner` in the relation table `table` are exactly `0..n-1`.
    /// Tables without positions are trivially ordered.
    pub fn check_ordering(&self, table: &str, owner: i64) -> Result<bool, DbError> {
        self.with_connection(|conn| {
            let descriptor = conn.query_opt(
                "SELECT descriptor FROM Relation WHERE name = ?",
                &[SqlValue::Text(table.to_string())],
                |row| column::<String>(row, 0),
            )?;
            let Some(descriptor) = descriptor else {
                return Err(DbError::Schema(format!("no relation table named {table}")));
            };
            let table = RelationTable::from_descriptor(table, &descriptor)?;
            if !table.is_positional() {
                return Ok(true);
            }
            let ords = conn.query(&table.ordinals_sql(), &[SqlValue::Integer(owner)], |row| {
                column::<i64>(row, 0)
            })?;
            Ok(is_dense(&ords))
        })
    }

    /// Every (table, owner) pair of a positional table whose positions are not dense.
    pub fn check_all_orderings(&self) -> Result<Vec<(String, i64)>, DbError> {
        self.with_connection(|conn| {
            let mut broken = vec![];
            for table in self.relation_tables(conn)? {
                if !table.is_positional() {
                    continue;
                }
                let owner = table.owner_col();
                let owners = conn.query(
                    &format!("SELECT DISTINCT {owner} FROM {}", table.quoted()),
                    &[],
                    |row| column::<i64>(row, 0),
                )?;
                for id in owners {
                    let ords = conn.query(&table.ordinals_sql(), &[SqlValue::Integer(id)], |row| {
                        column::<i64>(row, 0)
                    })?;
                    if !is_dense(&ords) {
                        broken.push((table.name().to_string(), id));
                    }
                }
            }
            Ok(broken)
        })
    }

    /// The stored `ord1` values of a persistent collection, in order.
    pub fn ordinals(&self, target: Target<'_>) -> Result<Vec<i64>, DbError> {
        let owner = target.owner();
        let Some(id) = owner.db_id().filter(|_| owner.is_stored()) else {
            return Ok(vec![]);
        };
        let table = target.table()?;
        if !table.is_positional() {
            return Ok(vec![]);
        }
        self.with_connection(|conn| {
            if !self.table_exists(conn, table.name())? {
                return Ok(vec![]);
            }
            conn.query(&table.ordinals_sql(), &[SqlValue::Integer(id)], |row| {
                column::<i64>(row, 0)
            })
        })
    }

    /// Number of persistent objects per `Object.typeName`.
    pub fn type_census(&self) -> Result<Vec<(String, i64)>, DbError> {
        self.with_connection(|conn| {
            conn.query(
                "SELECT typeName, count(*) FROM Object GROUP BY typeName ORDER BY typeName",
                &[],
                |row| Ok((column::<String>(row, 0)?, column::<i64>(row, 1)?)),
            )
        })
    }
}

fn is_dense(ords: &[i64]) -> bool {
    ords.iter().enumerate().all(|(i, o)| *o == i as i64)
}

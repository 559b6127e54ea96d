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

//! DDL for the metadata tables and for the tables derived from type declarations.

use crate::collection_codec::RelationTable;
use crate::connection::{Connection, SqlValue, column};
use crate::value_codec::value_columns;
use crate::{DbError, Gateway};
use mica_common::{
    AttrKind, CollectionType, ModelError, TypeDecl, TypeDef, TypeRegistry, split_type_name,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const METADATA_DDL: &str = "
CREATE TABLE IF NOT EXISTS Object (
    id INTEGER PRIMARY KEY,
    id2 INTEGER NOT NULL,
    flags TINYINT NOT NULL,
    typeName TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS Object_typeName ON Object(typeName);
CREATE TABLE IF NOT EXISTS Name (
    name TEXT PRIMARY KEY,
    id INTEGER UNIQUE NOT NULL
);
CREATE TABLE IF NOT EXISTS Package (
    name TEXT PRIMARY KEY,
    shortName TEXT UNIQUE NOT NULL
);
CREATE TABLE IF NOT EXISTS Relation (
    name TEXT PRIMARY KEY,
    descriptor TEXT NOT NULL
);
";

/// Quote an identifier for use in SQL text.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Tables known to exist, so repeated `ensure_*` calls skip the DDL.
#[derive(Default)]
pub(crate) struct KnownTables {
    tables: Mutex<HashSet<String>>,
}

impl KnownTables {
    fn contains(&self, name: &str) -> bool {
        self.tables.lock().contains(name)
    }

    fn insert(&self, name: &str) {
        self.tables.lock().insert(name.to_string());
    }
}

pub(crate) fn create_metadata_tables(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(METADATA_DDL)
}

/// Restore the full → short package mapping into the registry.
pub(crate) fn load_packages(conn: &Connection, registry: &TypeRegistry) -> Result<usize, DbError> {
    let packages = conn.query("SELECT name, shortName FROM Package", &[], |row| {
        Ok((column::<String>(row, 0)?, column::<String>(row, 1)?))
    })?;
    for (full, short) in &packages {
        registry.register_package(full, short)?;
    }
    Ok(packages.len())
}

fn type_table_ddl(def: &TypeDef) -> String {
    let mut columns = vec!["id INTEGER PRIMARY KEY".to_string()];
    for attr in &def.attrs {
        if let AttrKind::Prim(p) = &attr.kind {
            for (name, ty) in value_columns(&attr.name, *p) {
                columns.push(format!("{} {ty}", quote(&name)));
            }
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&def.short_name),
        columns.join(", ")
    )
}

impl Gateway {
    /// Whether table `name` exists, without writing anything. A table seen outside a
    /// transaction is remembered.
    pub(crate) fn table_exists(&self, conn: &Connection, name: &str) -> Result<bool, DbError> {
        let known = self.db.known_tables();
        if known.contains(name) {
            return Ok(true);
        }
        let found = conn
            .query_opt(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[SqlValue::Text(name.to_string())],
                |_| Ok(()),
            )?
            .is_some();
        if found && conn.is_autocommit() {
            known.insert(name);
        }
        Ok(found)
    }

    /// Create `name` with `ddl` unless it already exists. Nothing is written for an existing
    /// table. A table created inside a transaction only becomes known once that commits.
    fn ensure_table(
        &self,
        conn: &Connection,
        name: &str,
        ddl: impl FnOnce() -> Vec<String>,
    ) -> Result<(), DbError> {
        if self.table_exists(conn, name)? {
            return Ok(());
        }
        for statement in ddl() {
            conn.execute_batch(&statement)?;
        }
        debug!(table = name, "Created table");
        if conn.is_autocommit() {
            self.db.known_tables().insert(name);
        } else {
            self.created_tables.borrow_mut().push(name.to_string());
        }
        Ok(())
    }

    /// Record or forget the tables created by the transaction that just ended.
    pub(crate) fn settle_created_tables(&self, committed: bool) {
        let created = std::mem::take(&mut *self.created_tables.borrow_mut());
        if committed {
            let known = self.db.known_tables();
            for name in &created {
                known.insert(name);
            }
        }
    }

    /// The `Package` short name for `full`, inserting it if the store has none yet.
    pub(crate) fn ensure_package(&self, conn: &Connection, full: &str) -> Result<String, DbError> {
        let registry = self.db.registry();
        let stored_short = || {
            conn.query_opt(
                "SELECT shortName FROM Package WHERE name = ?",
                &[SqlValue::Text(full.to_string())],
                |row| column::<String>(row, 0),
            )
        };
        for _ in 0..4 {
            if let Some(short) = registry.package_short(full) {
                return Ok(short);
            }
            if let Some(short) = stored_short()? {
                registry.register_package(full, &short)?;
                return Ok(short);
            }
            let candidate = registry.choose_package_short(full);
            conn.execute(
                "INSERT OR IGNORE INTO Package (name, shortName) VALUES (?, ?)",
                &[
                    SqlValue::Text(full.to_string()),
                    SqlValue::Text(candidate.clone()),
                ],
            )?;
            match stored_short()? {
                Some(short) => {
                    registry.register_package(full, &short)?;
                    return Ok(short);
                }
                // The candidate short name was taken by another process; pick up its rows.
                None => {
                    load_packages(conn, registry)?;
                }
            }
        }
        Err(DbError::Schema(format!(
            "could not allocate a package short name for {full}"
        )))
    }

    /// Register a type declaration with the runtime and create its tables.
    pub fn define_type(&self, decl: TypeDecl) -> Result<Arc<TypeDef>, DbError> {
        self.with_connection(|conn| {
            if let (Some(package), _) = split_type_name(&decl.full_name) {
                self.ensure_package(conn, package)?;
            }
            let (def, created) = self.db.registry().define(decl).map_err(|e| match e {
                ModelError::DuplicateType(name) => {
                    DbError::Schema(format!("duplicate declaration of type {name}"))
                }
                other => other.into(),
            })?;
            if created {
                debug!(type_name = %def.full_name, short = %def.short_name, "Defined type");
            }
            self.ensure_type_table(&def)?;
            self.ensure_attribute_and_relation_tables(&def)?;
            Ok(def)
        })
    }

    /// Create the table holding `def`'s own primitive attributes.
    pub fn ensure_type_table(&self, def: &TypeDef) -> Result<(), DbError> {
        self.with_connection(|conn| {
            self.ensure_table(conn, &def.short_name, || vec![type_table_ddl(def)])
        })
    }

    /// Create one table per reference or multi-valued attribute declared on `def`.
    pub fn ensure_attribute_and_relation_tables(&self, def: &TypeDef) -> Result<(), DbError> {
        self.with_connection(|conn| {
            for attr in &def.attrs {
                if attr.is_primitive() {
                    continue;
                }
                let Some(table) = RelationTable::for_attr(def, attr) else {
                    continue;
                };
                self.ensure_relation_table(conn, &table)?;
            }
            Ok(())
        })
    }

    /// Tables for `def` and every supertype, with their attribute tables.
    pub(crate) fn ensure_lattice_tables(&self, def: &TypeDef) -> Result<(), DbError> {
        for t in def.lattice() {
            self.ensure_type_table(t)?;
            self.ensure_attribute_and_relation_tables(t)?;
        }
        Ok(())
    }

    /// The first table of `def`'s lattice that does not exist, if any.
    pub(crate) fn missing_lattice_table(
        &self,
        conn: &Connection,
        def: &TypeDef,
    ) -> Result<Option<String>, DbError> {
        for t in def.lattice() {
            if !self.table_exists(conn, &t.short_name)? {
                return Ok(Some(t.short_name.clone()));
            }
        }
        Ok(None)
    }

    /// The element table of independent collections of type `ct`.
    pub fn ensure_collection_table(&self, ct: &CollectionType) -> Result<(), DbError> {
        self.with_connection(|conn| {
            self.ensure_relation_table(conn, &RelationTable::for_collection(ct))
        })
    }

    pub(crate) fn ensure_relation_table(&self, conn: &Connection, table: &RelationTable) -> Result<(), DbError> {
        self.ensure_table(conn, table.name(), || {
            let mut ddl = table.ddl();
            ddl.push(format!(
                "INSERT OR IGNORE INTO Relation (name, descriptor) VALUES ({}, {})",
                sql_text(table.name()),
                sql_text(&table.descriptor()),
            ));
            ddl
        })
    }
}

/// A single-quoted SQL string literal.
fn sql_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_common::PrimType;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("v.Car"), "\"v.Car\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_type_table_flattens_primitives() {
        let registry = TypeRegistry::default();
        registry.register_package("v", "v").unwrap();
        let (def, _) = registry
            .define(
                TypeDecl::new("v.Car")
                    .prim("speed", PrimType::Int)
                    .prim("built", PrimType::Time)
                    .prim("lock", PrimType::Mutex)
                    .reference("owner", "v.Person"),
            )
            .unwrap();
        assert_eq!(
            type_table_ddl(&def),
            "CREATE TABLE IF NOT EXISTS \"v.Car\" (id INTEGER PRIMARY KEY, \"speed\" INTEGER, \
             \"built\" TEXT, \"built_loc\" TEXT)"
        );
    }
}

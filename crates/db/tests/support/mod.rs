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

//! Shared fixtures: a store in a temporary directory and a small garage schema.

#![allow(dead_code)]

use mica_common::{CollectionType, ElemType, PrimType, TypeDecl, TypeDef, TypeRegistry};
use mica_db::{Database, DatabaseConfig, Gateway};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Store {
    pub tmpdir: TempDir,
    pub db: Database,
}

impl Store {
    pub fn path(&self) -> PathBuf {
        self.tmpdir.path().join("objects.db")
    }

    /// A second `Database` over the same file, with an empty cache and registry, as a restarted
    /// process would see it.
    pub fn reopen(&self) -> Database {
        open(&self.path(), DatabaseConfig::default())
    }

    /// Direct SQLite access for asserting on rows.
    pub fn raw(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(self.path()).unwrap()
    }
}

pub fn open(path: &Path, mut config: DatabaseConfig) -> Database {
    config.path = Some(path.to_path_buf());
    Database::new(config, Arc::new(TypeRegistry::default()))
}

pub fn store_with(config: DatabaseConfig) -> Store {
    let tmpdir = TempDir::new().unwrap();
    let db = open(&tmpdir.path().join("objects.db"), config);
    Store { tmpdir, db }
}

pub fn store() -> Store {
    store_with(DatabaseConfig::default())
}

pub struct Garage {
    pub person: Arc<TypeDef>,
    pub vehicle: Arc<TypeDef>,
    pub car: Arc<TypeDef>,
}

/// `garage.Person`, `garage.Vehicle` and its subtype `garage.Car`.
pub fn garage(gateway: &Gateway) -> Garage {
    let person = gateway
        .define_type(
            TypeDecl::new("garage.Person")
                .prim("name", PrimType::Str)
                .prim("born", PrimType::Time)
                .many(
                    "cars",
                    CollectionType::list(ElemType::Ref("garage.Vehicle".to_string())),
                )
                .inverse("owner"),
        )
        .unwrap();
    let vehicle = gateway
        .define_type(
            TypeDecl::new("garage.Vehicle")
                .prim("name", PrimType::Str)
                .prim("speed", PrimType::Int)
                .prim("weight", PrimType::Float)
                .prim("electric", PrimType::Bool)
                .prim("engine", PrimType::Complex)
                .prim("lock", PrimType::Mutex)
                .reference("owner", "garage.Person")
                .many("tags", CollectionType::set(ElemType::Prim(PrimType::Str)))
                .many("stops", CollectionType::list(ElemType::Prim(PrimType::Str)))
                .many(
                    "drivers",
                    CollectionType::str_map(ElemType::Ref("garage.Person".to_string())),
                ),
        )
        .unwrap();
    let car = gateway
        .define_type(
            TypeDecl::new("garage.Car")
                .extends("garage.Vehicle")
                .prim("doors", PrimType::Int),
        )
        .unwrap();
    Garage {
        person,
        vehicle,
        car,
    }
}

pub fn count(raw: &rusqlite::Connection, sql: &str, id: i64) -> i64 {
    raw.query_row(sql, [id], |row| row.get(0)).unwrap()
}

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

//! The persistent object layer: language objects stored in SQLite, one table per type and one
//! per non-primitive attribute, reached through a per-thread `Gateway`.

mod collection_codec;
mod config;
mod connection;
mod database;
mod error;
mod gateway;
mod loader;
mod maintenance;
mod naming;
mod object_codec;
mod pool;
mod query;
mod schema;
mod transaction;
mod value_codec;

pub use collection_codec::{Removal, Target};
pub use config::{DatabaseConfig, MERGED_POOLS, PoolLayout, RetryPolicy};
pub use connection::{Connection, SqlValue, StoreTarget};
pub use database::Database;
pub use error::{DbError, NotFound};
pub use gateway::Gateway;
pub use loader::CodeLoader;
pub use pool::PoolStats;
pub use transaction::TxMode;

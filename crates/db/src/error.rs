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

use mica_common::ModelError;
use rusqlite::ErrorCode;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// What a lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    Object(i64),
    Name(String),
    Type(String),
    /// A single-valued reference attribute with no stored row.
    Attribute { owner: i64, attr: String },
}

impl Display for NotFound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFound::Object(id) => write!(f, "object #{id}"),
            NotFound::Name(name) => write!(f, "name {name:?}"),
            NotFound::Type(name) => write!(f, "type {name}"),
            NotFound::Attribute { owner, attr } => write!(f, "attribute {attr} of #{owner}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQL error in `{sql}`: {source}")]
    Sql {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Store still contended after {attempts} attempts of `{sql}`: {source}")]
    Contention {
        sql: String,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Could not open store {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Schema violation: {0}")]
    Schema(String),
    #[error("Invalid query `{expression}` on {root_type}: {message}")]
    Query {
        expression: String,
        root_type: String,
        message: String,
    },
    #[error("Integrity violation: {0}")]
    Integrity(String),
    #[error("Not found: {0}")]
    NotFound(NotFound),
    #[error("Cannot decode column {column}: {message}")]
    Decode { column: String, message: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Connection requested while this gateway is already acquiring one")]
    Reentrant,
    #[error("Cannot begin a transaction while this gateway holds a connection (depth {depth})")]
    TransactionOpen { depth: usize },
    #[error("Name {name:?} already names object #{holder}")]
    NameInUse { name: String, holder: i64 },
    #[error("Object #{id} is already named {name:?}")]
    AlreadyNamed { id: i64, name: String },
    #[error(transparent)]
    Model(#[from] ModelError),
}

fn sqlite_codes(e: &rusqlite::Error) -> Option<(ErrorCode, i32)> {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => Some((err.code, err.extended_code)),
        _ => None,
    }
}

impl DbError {
    /// Wrap a statement error with the SQL text that produced it.
    pub(crate) fn sql(sql: &str) -> impl FnOnce(rusqlite::Error) -> DbError + '_ {
        move |source| DbError::Sql {
            sql: sql.to_string(),
            source,
        }
    }

    /// Transient failures caused by another connection holding the writer lock.
    pub fn is_contention(&self) -> bool {
        let source = match self {
            DbError::Sql { source, .. } | DbError::Contention { source, .. } => source,
            _ => return false,
        };
        matches!(
            sqlite_codes(source),
            Some((ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked, _))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }

    /// A duplicate `id` on insert into a table keyed by it.
    pub(crate) fn is_key_collision(&self) -> bool {
        let DbError::Sql { source, .. } = self else {
            return false;
        };
        matches!(
            sqlite_codes(source),
            Some((ErrorCode::ConstraintViolation, code))
                if code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}

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

use crate::config::DatabaseConfig;
use crate::connection::StoreTarget;
use crate::loader::CodeLoader;
use crate::pool::{ConnectionPool, PoolStats};
use crate::schema::{KnownTables, create_metadata_tables, load_packages};
use crate::{DbError, Gateway};
use mica_common::{InterpThread, ObjectCache, TypeRegistry};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// One persistent store, shared by every interpreter thread. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    config: DatabaseConfig,
    uri: RwLock<Option<PathBuf>>,
    pool: Mutex<Option<Arc<ConnectionPool>>>,
    registry: Arc<TypeRegistry>,
    cache: ObjectCache,
    known_tables: KnownTables,
    loader: RwLock<Option<Arc<dyn CodeLoader>>>,
}

impl Database {
    /// A store over `config.path`, or a private in-memory store when it is `None`. Nothing is
    /// opened until a gateway first needs a connection.
    pub fn new(config: DatabaseConfig, registry: Arc<TypeRegistry>) -> Self {
        let uri = config.path.clone();
        Self {
            inner: Arc::new(Inner {
                config,
                uri: RwLock::new(uri),
                pool: Mutex::new(None),
                registry,
                cache: ObjectCache::default(),
                known_tables: KnownTables::default(),
                loader: RwLock::new(None),
            }),
        }
    }

    /// Point the store at `path`. Only possible before first use.
    pub fn set_database_uri(&self, path: impl Into<PathBuf>) -> Result<(), DbError> {
        if self.inner.pool.lock().is_some() {
            return Err(DbError::Config(
                "the store location cannot change once it is open".to_string(),
            ));
        }
        *self.inner.uri.write() = Some(path.into());
        Ok(())
    }

    /// Adopt `path` unless a location has already been set.
    pub fn ensure_database(&self, path: impl Into<PathBuf>) {
        let mut uri = self.inner.uri.write();
        if uri.is_none() {
            *uri = Some(path.into());
        }
    }

    pub fn database_uri(&self) -> Option<PathBuf> {
        self.inner.uri.read().clone()
    }

    pub fn set_loader(&self, loader: Arc<dyn CodeLoader>) {
        *self.inner.loader.write() = Some(loader);
    }

    pub(crate) fn loader(&self) -> Option<Arc<dyn CodeLoader>> {
        self.inner.loader.read().clone()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub(crate) fn known_tables(&self) -> &KnownTables {
        &self.inner.known_tables
    }

    /// A gateway for one interpreter thread. `thread` receives the GC hooks around blocking
    /// points.
    pub fn new_thread(&self, thread: Option<Arc<dyn InterpThread>>) -> Gateway {
        Gateway::new(self.clone(), thread)
    }

    /// Idle and created connection counts, once the store is open.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.inner.pool.lock().as_ref().map(|p| p.stats())
    }

    /// The connection pool, opening the store on first call: the parent directory is created,
    /// the metadata tables are ensured, and stored packages are restored into the registry.
    pub(crate) fn pool(&self) -> Result<Arc<ConnectionPool>, DbError> {
        let mut slot = self.inner.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let target = match self.database_uri() {
            Some(path) => {
                create_parent(&path)?;
                StoreTarget::File(path)
            }
            None => StoreTarget::InMemory,
        };
        let pool = Arc::new(ConnectionPool::new(target, self.inner.config.clone())?);
        let conn = pool.grab(true)?;
        let restored = create_metadata_tables(&conn)
            .and_then(|_| load_packages(&conn, &self.inner.registry));
        pool.release(conn);
        let packages = restored?;
        info!(target = ?pool.target(), packages, "Opened store");
        *slot = Some(pool.clone());
        Ok(pool)
    }
}

fn create_parent(path: &Path) -> Result<(), DbError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|source| DbError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

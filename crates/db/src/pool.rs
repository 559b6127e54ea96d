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

use crate::config::PoolLayout;
use crate::connection::{Connection, StoreTarget};
use crate::{DatabaseConfig, DbError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

struct Idle {
    connections: Vec<Connection>,
    created: usize,
}

/// A capped LIFO of idle connections that grows lazily.
struct SubPool {
    name: &'static str,
    max: usize,
    read_only: bool,
    idle: Mutex<Idle>,
    released: Condvar,
}

impl SubPool {
    fn new(name: &'static str, max: usize, read_only: bool) -> Self {
        Self {
            name,
            max,
            read_only,
            idle: Mutex::new(Idle {
                connections: vec![],
                created: 0,
            }),
            released: Condvar::new(),
        }
    }
}

/// Connections to one store, split into a read pool and an optional write pool.
///
/// With a merged layout every connection lives in the read pool and is not flagged read-only.
pub(crate) struct ConnectionPool {
    target: StoreTarget,
    config: DatabaseConfig,
    read: SubPool,
    write: Option<SubPool>,
    next_id: AtomicUsize,
    creation_lock: Mutex<()>,
}

impl ConnectionPool {
    pub(crate) fn new(target: StoreTarget, config: DatabaseConfig) -> Result<Self, DbError> {
        let layout = match target {
            StoreTarget::InMemory => PoolLayout::Merged { max: 1 },
            StoreTarget::File(_) => config.pool_layout()?,
        };
        let (read, write) = match layout {
            PoolLayout::Merged { max } => (SubPool::new("merged", max, false), None),
            PoolLayout::Split { read, write } => (
                SubPool::new("read", read, true),
                Some(SubPool::new("write", write, false)),
            ),
        };
        Ok(Self {
            target,
            config,
            read,
            write,
            next_id: AtomicUsize::new(1),
            creation_lock: Mutex::new(()),
        })
    }

    pub(crate) fn target(&self) -> &StoreTarget {
        &self.target
    }

    fn pool_for(&self, doing_write: bool) -> &SubPool {
        match (&self.write, doing_write) {
            (Some(write), true) => write,
            _ => &self.read,
        }
    }

    /// Take a connection, creating one if the pool is below its cap, otherwise blocking until
    /// another caller releases one.
    pub(crate) fn grab(&self, doing_write: bool) -> Result<Connection, DbError> {
        let pool = self.pool_for(doing_write);
        let mut idle = pool.idle.lock();
        loop {
            if let Some(conn) = idle.connections.pop() {
                return Ok(conn);
            }
            if idle.created < pool.max {
                idle.created += 1;
                drop(idle);
                return self.create(pool);
            }
            pool.released.wait(&mut idle);
        }
    }

    fn create(&self, pool: &SubPool) -> Result<Connection, DbError> {
        let opened = {
            let _creating = self.creation_lock.lock();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Connection::open(&self.target, id, pool.read_only, &self.config)
        };
        match opened {
            Ok(conn) => {
                debug!(pool = pool.name, id = conn.id(), max = pool.max, "Grew connection pool");
                Ok(conn)
            }
            Err(e) => {
                pool.idle.lock().created -= 1;
                pool.released.notify_one();
                Err(e)
            }
        }
    }

    /// Return a connection to the pool it was drawn from.
    pub(crate) fn release(&self, conn: Connection) {
        let pool = match (&self.write, conn.is_read_only()) {
            (Some(write), false) => write,
            _ => &self.read,
        };
        pool.idle.lock().connections.push(conn);
        pool.released.notify_one();
    }

    /// Idle and created counts of the read (or merged) pool and of the write pool.
    pub(crate) fn stats(&self) -> PoolStats {
        let count = |p: &SubPool| {
            let idle = p.idle.lock();
            (idle.connections.len(), idle.created)
        };
        PoolStats {
            read: count(&self.read),
            write: self.write.as_ref().map(count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// (idle, created)
    pub read: (usize, usize),
    pub write: Option<(usize, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    fn file_pool(dir: &tempfile::TempDir, read: i32, write: i32) -> ConnectionPool {
        let config = DatabaseConfig {
            max_connections: read,
            max_write_connections: write,
            ..Default::default()
        };
        ConnectionPool::new(StoreTarget::File(dir.path().join("pool.db")), config).unwrap()
    }

    #[test]
    fn test_lifo_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, 4, -1);
        let a = pool.grab(false).unwrap();
        let b = pool.grab(false).unwrap();
        let (a_id, b_id) = (a.id(), b.id());
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.grab(false).unwrap().id(), b_id);
        assert_eq!(pool.stats().read, (1, 2));
        assert_ne!(a_id, b_id);
    }

    #[test]
    fn test_split_pools_route_by_flag() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, 2, 1);
        let reader = pool.grab(false).unwrap();
        let writer = pool.grab(true).unwrap();
        assert!(reader.is_read_only());
        assert!(!writer.is_read_only());
        pool.release(writer);
        pool.release(reader);
        let stats = pool.stats();
        assert_eq!(stats.read, (1, 1));
        assert_eq!(stats.write, Some((1, 1)));
    }

    #[test]
    fn test_in_memory_is_single_connection() {
        let pool =
            ConnectionPool::new(StoreTarget::InMemory, DatabaseConfig::default()).unwrap();
        let conn = pool.grab(true).unwrap();
        pool.release(conn);
        let again = pool.grab(false).unwrap();
        assert_eq!(again.id(), 1);
        assert_eq!(pool.stats().read, (0, 1));
    }

    #[test]
    fn test_grab_blocks_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(file_pool(&dir, 1, -1));
        let held = pool.grab(true).unwrap();
        let held_id = held.id();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let conn = pool.grab(true).unwrap();
                tx.send(conn.id()).unwrap();
                pool.release(conn);
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        pool.release(held);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), held_id);
        waiter.join().unwrap();
    }
}

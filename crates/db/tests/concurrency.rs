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

//! Several gateways over one store: writer exclusion, retry exhaustion, and connection
//! ownership.

mod support;

#[cfg(test)]
mod tests {
    use crate::support::{self, garage};
    use mica_common::{InterpThread, Object, Value};
    use mica_db::{DatabaseConfig, DbError, PoolStats, RetryPolicy, TxMode};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn test_concurrent_immediate_transactions_both_commit() {
        let store = support::store();
        let car_type = garage(&store.db.new_thread(None)).car;
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["cars/left", "cars/right"]
            .into_iter()
            .map(|name| {
                let db = store.db.clone();
                let barrier = barrier.clone();
                let car_type = car_type.clone();
                std::thread::spawn(move || {
                    let g = db.new_thread(None);
                    let car = Object::new(car_type);
                    car.set("name", Value::str(name)).unwrap();
                    barrier.wait();
                    g.transaction(TxMode::Immediate, |g| g.dub(&car, name))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let db = store.reopen();
        let g = db.new_thread(None);
        garage(&g);
        for name in ["cars/left", "cars/right"] {
            let car = g.fetch_by_name(name, 0).unwrap();
            assert_eq!(car.get("name").unwrap(), Some(Value::str(name)));
        }
    }

    #[derive(Default)]
    struct CountingThread {
        allowed: AtomicUsize,
        disallowed: AtomicUsize,
    }

    impl InterpThread for CountingThread {
        fn allow_gc(&self) {
            self.allowed.fetch_add(1, Ordering::SeqCst);
        }

        fn disallow_gc(&self) {
            self.disallowed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_gc_is_permitted_around_pool_waits() {
        let store = support::store();
        let thread = Arc::new(CountingThread::default());
        let g = store.db.new_thread(Some(thread.clone()));
        let car = Object::new(garage(&g).car);
        g.transaction(TxMode::Immediate, |g| g.dub(&car, "cars/gc"))
            .unwrap();
        assert!(g.exists("cars/gc").unwrap());

        let allowed = thread.allowed.load(Ordering::SeqCst);
        assert!(allowed > 0);
        assert_eq!(thread.disallowed.load(Ordering::SeqCst), allowed);
    }

    #[test]
    fn test_retry_budget_exhaustion_is_contention() {
        let store = support::store_with(DatabaseConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                base_step: Duration::from_millis(1),
                widened_step: Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        });
        let holder = store.db.new_thread(None);
        let waiter = store.db.new_thread(None);
        // Open both connections before either takes the writer lock.
        holder.acquire().unwrap();
        waiter.acquire().unwrap();
        holder.release();
        waiter.release();
        holder.begin(TxMode::Immediate).unwrap();

        let err = waiter.begin(TxMode::Immediate).unwrap_err();
        assert!(err.is_contention(), "unexpected error: {err}");
        assert!(matches!(err, DbError::Contention { attempts: 2, .. }));
        assert!(!waiter.holds_connection());

        holder.commit().unwrap();
        waiter.begin(TxMode::Immediate).unwrap();
        waiter.rollback().unwrap();
    }

    #[test]
    fn test_ownership_is_reentrant() {
        let store = support::store();
        let g = store.db.new_thread(None);
        assert_eq!(g.ownership_depth(), 0);
        g.begin(TxMode::Immediate).unwrap();
        assert_eq!(g.ownership_depth(), 1);
        g.with_connection(|_| {
            assert_eq!(g.ownership_depth(), 2);
            g.with_connection(|_| {
                assert_eq!(g.ownership_depth(), 3);
                Ok(())
            })
        })
        .unwrap();
        assert_eq!(g.ownership_depth(), 1);
        assert!(g.holds_connection());
        g.commit().unwrap();
        assert_eq!(g.ownership_depth(), 0);
        assert!(!g.holds_connection());
    }

    #[test]
    fn test_begin_refused_while_a_connection_is_held() {
        let store = support::store_with(DatabaseConfig {
            max_connections: 2,
            max_write_connections: 1,
            ..Default::default()
        });
        let g = store.db.new_thread(None);
        let car = Object::new(garage(&g).car);
        g.begin(TxMode::Immediate).unwrap();
        g.dub(&car, "cars/first").unwrap();
        assert!(matches!(
            g.begin(TxMode::Deferred),
            Err(DbError::TransactionOpen { depth: 1 })
        ));
        assert_eq!(g.ownership_depth(), 1);
        g.commit().unwrap();
        assert!(g.exists("cars/first").unwrap());
        assert_eq!(store.db.pool_stats().unwrap().write, Some((1, 1)));

        g.acquire().unwrap();
        assert!(matches!(
            g.begin(TxMode::Immediate),
            Err(DbError::TransactionOpen { depth: 1 })
        ));
        assert!(g.release());
        g.transaction(TxMode::Deferred, |g| g.exists("cars/first")).unwrap();
    }

    #[test]
    fn test_nested_acquire_keeps_the_same_connection_alive() {
        let store = support::store();
        let g = store.db.new_thread(None);
        g.acquire().unwrap();
        g.acquire().unwrap();
        assert!(!g.release());
        assert!(g.holds_connection());
        assert!(g.release());
        assert!(!g.release());
    }

    #[test]
    fn test_deferred_transactions_use_the_read_pool() {
        let store = support::store_with(DatabaseConfig {
            max_connections: 2,
            max_write_connections: 1,
            ..Default::default()
        });
        let g = store.db.new_thread(None);
        g.begin(TxMode::Deferred).unwrap();
        assert!(!g.exists("nothing/here").unwrap());
        assert_eq!(
            store.db.pool_stats(),
            Some(PoolStats {
                read: (0, 1),
                write: Some((1, 1)),
            })
        );
        g.commit().unwrap();
        assert_eq!(store.db.pool_stats().unwrap().read, (1, 1));

        let car = Object::new(garage(&g).car);
        g.transaction(TxMode::Immediate, |g| g.dub(&car, "cars/written"))
            .unwrap();
        assert_eq!(store.db.pool_stats().unwrap().write, Some((1, 1)));
    }
}

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

//! Single-threaded write and read paths against a file-backed store: persisting fresh
//! objects, appending to a list attribute, and fetching by id through an empty cache.

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use mica_common::{CollectionType, ElemType, Object, PrimType, TypeDecl, TypeDef, TypeRegistry, Value};
use mica_db::{Database, DatabaseConfig, Gateway, Target, TxMode};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const BATCH: u64 = 100;

fn open(dir: &TempDir) -> Database {
    let config = DatabaseConfig {
        path: Some(dir.path().join("bench.db")),
        ..Default::default()
    };
    Database::new(config, Arc::new(TypeRegistry::default()))
}

fn define(g: &Gateway) -> Arc<TypeDef> {
    g.define_type(
        TypeDecl::new("bench.Item")
            .prim("name", PrimType::Str)
            .prim("count", PrimType::Int)
            .many("log", CollectionType::list(ElemType::Prim(PrimType::Str))),
    )
    .unwrap()
}

fn item(def: &Arc<TypeDef>, n: u64) -> Object {
    let o = Object::new(def.clone());
    o.set("name", Value::str(format!("item-{n}"))).unwrap();
    o.set("count", Value::Int(n as i64)).unwrap();
    o
}

fn persist_batch(iters: u64) -> Duration {
    let mut cumulative = Duration::ZERO;
    for _ in 0..iters {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let g = db.new_thread(None);
        let def = define(&g);
        let objects: Vec<_> = (0..BATCH).map(|n| item(&def, n)).collect();

        let start = Instant::now();
        g.transaction(TxMode::Immediate, |g| {
            for o in &objects {
                black_box(g.ensure_persisted(o)?);
            }
            Ok(())
        })
        .unwrap();
        cumulative += start.elapsed();
    }
    cumulative
}

fn append_batch(iters: u64) -> Duration {
    let mut cumulative = Duration::ZERO;
    for _ in 0..iters {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let g = db.new_thread(None);
        let def = define(&g);
        let o = item(&def, 0);
        g.ensure_persisted(&o).unwrap();

        let start = Instant::now();
        g.transaction(TxMode::Immediate, |g| {
            for n in 0..BATCH {
                g.insert(Target::Attr(&o, "log"), Value::str(format!("entry {n}")))?;
            }
            Ok(())
        })
        .unwrap();
        cumulative += start.elapsed();
    }
    cumulative
}

fn fetch_batch(iters: u64) -> Duration {
    let dir = TempDir::new().unwrap();
    let ids: Vec<i64> = {
        let db = open(&dir);
        let g = db.new_thread(None);
        let def = define(&g);
        (0..BATCH)
            .map(|n| g.ensure_persisted(&item(&def, n)).unwrap())
            .collect()
    };

    let mut cumulative = Duration::ZERO;
    for _ in 0..iters {
        // A fresh database each round, so every fetch misses the cache.
        let db = open(&dir);
        let g = db.new_thread(None);
        define(&g);
        let start = Instant::now();
        for id in &ids {
            black_box(g.fetch(*id, 1).unwrap());
        }
        cumulative += start.elapsed();
    }
    cumulative
}

pub fn persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");
    group.sample_size(20);
    group.throughput(Throughput::Elements(BATCH));
    group.bench_function("ensure_persisted", |b| b.iter_custom(persist_batch));
    group.bench_function("list_append", |b| b.iter_custom(append_batch));
    group.bench_function("fetch_cold", |b| b.iter_custom(fetch_batch));
    group.finish();
}

criterion_group!(benches, persistence);
criterion_main!(benches);

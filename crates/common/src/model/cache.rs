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

use crate::model::{Object, WeakObject};
use ahash::AHashMap;
use parking_lot::Mutex;

/// Process-wide map from database id to the live object carrying it, so that every fetch of
/// an id yields the same in-memory object while anything still holds it.
#[derive(Default)]
pub struct ObjectCache {
    objects: Mutex<AHashMap<i64, WeakObject>>,
}

impl ObjectCache {
    pub fn get(&self, db_id: i64) -> Option<Object> {
        let mut objects = self.objects.lock();
        let found = objects.get(&db_id).and_then(WeakObject::upgrade);
        if found.is_none() {
            objects.remove(&db_id);
        }
        found
    }

    /// Register `obj` under `db_id`. If a different live object is already registered, that
    /// one wins and is returned.
    pub fn insert(&self, db_id: i64, obj: &Object) -> Object {
        let mut objects = self.objects.lock();
        if let Some(existing) = objects.get(&db_id).and_then(WeakObject::upgrade) {
            return existing;
        }
        objects.insert(db_id, obj.downgrade());
        obj.clone()
    }

    pub fn remove(&self, db_id: i64) {
        self.objects.lock().remove(&db_id);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut objects = self.objects.lock();
        objects.retain(|_, w| w.upgrade().is_some());
        objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

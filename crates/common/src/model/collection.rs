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

use crate::model::{
    CollectionKind, CollectionType, ElemType, KeyType, ModelError, PrimType, Value,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Keys of map collections. Only integer and string keys are supported.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Int(i64),
    Str(String),
}

impl MapKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            MapKey::Int(_) => KeyType::Int,
            MapKey::Str(_) => KeyType::Str,
        }
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Int(i) => Some(MapKey::Int(*i)),
            Value::Str(s) => Some(MapKey::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for MapKey {
    fn from(v: i64) -> Self {
        MapKey::Int(v)
    }
}

impl From<&str> for MapKey {
    fn from(v: &str) -> Self {
        MapKey::Str(v.to_string())
    }
}

impl Display for MapKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MapKey::Int(i) => write!(f, "{i}"),
            MapKey::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Check that `v` may be stored where `elem` is declared.
pub(crate) fn check_elem(context: &str, elem: &ElemType, v: &Value) -> Result<(), ModelError> {
    let ok = match (elem, v) {
        (ElemType::Prim(p), v) => v.prim_type() == Some(*p),
        (ElemType::Ref(t), Value::Ref(r)) => match r.object().and_then(|o| o.type_def()) {
            Some(def) => def.is_subtype_of(t),
            None => true,
        },
        (ElemType::Ref(_), _) => false,
    };
    if ok {
        return Ok(());
    }
    let expected = match elem {
        ElemType::Prim(p) => p.name().to_string(),
        ElemType::Ref(t) => t.clone(),
    };
    Err(ModelError::TypeMismatch {
        attr: context.to_string(),
        expected,
        got: v.type_name().to_string(),
    })
}

fn wrong_op(ty: &CollectionType, op: &'static str) -> ModelError {
    ModelError::WrongCollectionOp {
        descriptor: ty.descriptor(),
        op,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Elements {
    Seq(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
}

/// In-memory contents of a multi-valued attribute or an independent collection.
///
/// Positional kinds keep their elements in the order their `ord1` column records; sorted kinds
/// keep that order equal to [`Value::sort_cmp`].
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    ty: CollectionType,
    elements: Elements,
}

impl Collection {
    pub fn new(ty: CollectionType) -> Self {
        let elements = if ty.kind().is_map() {
            Elements::Map(BTreeMap::new())
        } else {
            Elements::Seq(vec![])
        };
        Self { ty, elements }
    }

    /// Rebuild a non-map collection from stored elements, already in stored order.
    pub fn from_seq(ty: CollectionType, values: Vec<Value>) -> Result<Self, ModelError> {
        if ty.kind().is_map() {
            return Err(ModelError::WrongCollectionOp {
                descriptor: ty.descriptor(),
                op: "from_seq",
            });
        }
        Ok(Self {
            ty,
            elements: Elements::Seq(values),
        })
    }

    pub fn from_entries(
        ty: CollectionType,
        entries: impl IntoIterator<Item = (MapKey, Value)>,
    ) -> Result<Self, ModelError> {
        if !ty.kind().is_map() {
            return Err(ModelError::WrongCollectionOp {
                descriptor: ty.descriptor(),
                op: "from_entries",
            });
        }
        Ok(Self {
            ty,
            elements: Elements::Map(entries.into_iter().collect()),
        })
    }

    pub fn ty(&self) -> &CollectionType {
        &self.ty
    }

    pub fn len(&self) -> usize {
        match &self.elements {
            Elements::Seq(v) => v.len(),
            Elements::Map(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element values; for maps, in key order.
    pub fn values(&self) -> Vec<Value> {
        match &self.elements {
            Elements::Seq(v) => v.clone(),
            Elements::Map(m) => m.values().cloned().collect(),
        }
    }

    pub fn entries(&self) -> Vec<(MapKey, Value)> {
        match &self.elements {
            Elements::Seq(_) => vec![],
            Elements::Map(m) => m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        match &self.elements {
            Elements::Seq(v) => v.get(index),
            Elements::Map(_) => None,
        }
    }

    pub fn get_key(&self, key: &MapKey) -> Option<&Value> {
        match &self.elements {
            Elements::Seq(_) => None,
            Elements::Map(m) => m.get(key),
        }
    }

    pub fn contains(&self, v: &Value) -> bool {
        match &self.elements {
            Elements::Seq(s) => s.contains(v),
            Elements::Map(m) => m.values().any(|e| e == v),
        }
    }

    fn wrong(&self, op: &'static str) -> ModelError {
        wrong_op(&self.ty, op)
    }

    fn seq_mut(&mut self, op: &'static str) -> Result<&mut Vec<Value>, ModelError> {
        match &mut self.elements {
            Elements::Seq(v) => Ok(v),
            Elements::Map(_) => Err(wrong_op(&self.ty, op)),
        }
    }

    fn map_mut(&mut self, op: &'static str) -> Result<&mut BTreeMap<MapKey, Value>, ModelError> {
        match &mut self.elements {
            Elements::Map(m) => Ok(m),
            Elements::Seq(_) => Err(wrong_op(&self.ty, op)),
        }
    }

    fn check(&self, v: &Value) -> Result<(), ModelError> {
        check_elem(&self.ty.descriptor(), self.ty.elem(), v)
    }

    /// Add `v` where its kind puts it: appended for lists and sets, at its sorted position for
    /// sorted kinds. Returns the index it landed at, or `None` if a set already held it.
    pub fn insert(&mut self, v: Value) -> Result<Option<usize>, ModelError> {
        self.check(&v)?;
        let kind = self.ty.kind();
        let seq = self.seq_mut("insert")?;
        let index = match kind {
            CollectionKind::Set => {
                if seq.contains(&v) {
                    return Ok(None);
                }
                seq.len()
            }
            CollectionKind::SortedList => seq.partition_point(|e| e.sort_cmp(&v) != Ordering::Greater),
            CollectionKind::SortedSet => {
                let lo = seq.partition_point(|e| e.sort_cmp(&v) == Ordering::Less);
                let hi = seq.partition_point(|e| e.sort_cmp(&v) != Ordering::Greater);
                if seq[lo..hi].contains(&v) {
                    return Ok(None);
                }
                hi
            }
            _ => seq.len(),
        };
        seq.insert(index, v);
        Ok(Some(index))
    }

    /// Insert at a caller-chosen index. Only unsorted lists accept this.
    pub fn insert_at(&mut self, index: usize, v: Value) -> Result<(), ModelError> {
        if self.ty.kind() != CollectionKind::List {
            return Err(self.wrong("insert_at"));
        }
        self.check(&v)?;
        let seq = self.seq_mut("insert_at")?;
        if index > seq.len() {
            return Err(ModelError::IndexOutOfRange {
                index,
                len: seq.len(),
            });
        }
        seq.insert(index, v);
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Value, ModelError> {
        if !self.ty.kind().is_positional() {
            return Err(ModelError::NotPositional(self.ty.descriptor()));
        }
        let seq = self.seq_mut("remove_at")?;
        if index >= seq.len() {
            return Err(ModelError::IndexOutOfRange {
                index,
                len: seq.len(),
            });
        }
        Ok(seq.remove(index))
    }

    /// Remove the first element equal to `v`, returning the index it occupied.
    pub fn remove_value(&mut self, v: &Value) -> Result<Option<usize>, ModelError> {
        let seq = self.seq_mut("remove_value")?;
        let Some(index) = seq.iter().position(|e| e == v) else {
            return Ok(None);
        };
        seq.remove(index);
        Ok(Some(index))
    }

    /// Replace the element at `index`, returning the previous one. Only unsorted lists accept
    /// this, as it would otherwise break the sort order.
    pub fn set_at(&mut self, index: usize, v: Value) -> Result<Value, ModelError> {
        if self.ty.kind() != CollectionKind::List {
            return Err(self.wrong("set_at"));
        }
        self.check(&v)?;
        let seq = self.seq_mut("set_at")?;
        let len = seq.len();
        let slot = seq
            .get_mut(index)
            .ok_or(ModelError::IndexOutOfRange { index, len })?;
        Ok(std::mem::replace(slot, v))
    }

    pub fn put(&mut self, key: MapKey, v: Value) -> Result<Option<Value>, ModelError> {
        if Some(key.key_type()) != self.ty.key() {
            return Err(ModelError::TypeMismatch {
                attr: self.ty.descriptor(),
                expected: self.ty.key().map(|k| k.name()).unwrap_or("no key").to_string(),
                got: key.key_type().name().to_string(),
            });
        }
        self.check(&v)?;
        Ok(self.map_mut("put")?.insert(key, v))
    }

    pub fn remove_key(&mut self, key: &MapKey) -> Result<Option<Value>, ModelError> {
        Ok(self.map_mut("remove_key")?.remove(key))
    }

    pub fn clear(&mut self) {
        match &mut self.elements {
            Elements::Seq(v) => v.clear(),
            Elements::Map(m) => m.clear(),
        }
    }

    /// Element values that are object references.
    pub fn refs(&self) -> impl Iterator<Item = &crate::model::ObjRef> {
        let values: Box<dyn Iterator<Item = &Value>> = match &self.elements {
            Elements::Seq(v) => Box::new(v.iter()),
            Elements::Map(m) => Box::new(m.values()),
        };
        values.filter_map(Value::as_obj_ref)
    }

    pub fn elem_prim(&self) -> Option<PrimType> {
        match self.ty.elem() {
            ElemType::Prim(p) => Some(*p),
            ElemType::Ref(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ints(c: &Collection) -> Vec<i64> {
        c.values().iter().filter_map(Value::as_int).collect()
    }

    #[test]
    fn test_sorted_list_keeps_order_and_duplicates() {
        let ty =
            CollectionType::new(CollectionKind::SortedList, None, ElemType::Prim(PrimType::Int))
                .unwrap();
        let mut c = Collection::new(ty);
        assert_eq!(c.insert(Value::Int(5)).unwrap(), Some(0));
        assert_eq!(c.insert(Value::Int(1)).unwrap(), Some(0));
        assert_eq!(c.insert(Value::Int(5)).unwrap(), Some(2));
        assert_eq!(c.insert(Value::Int(3)).unwrap(), Some(1));
        assert_eq!(ints(&c), vec![1, 3, 5, 5]);
    }

    #[test]
    fn test_sets_skip_duplicates() {
        let mut set = Collection::new(CollectionType::set(ElemType::Prim(PrimType::Str)));
        assert!(set.insert(Value::str("a")).unwrap().is_some());
        assert!(set.insert(Value::str("a")).unwrap().is_none());

        let ty =
            CollectionType::new(CollectionKind::SortedSet, None, ElemType::Prim(PrimType::Int))
                .unwrap();
        let mut sorted = Collection::new(ty);
        sorted.insert(Value::Int(2)).unwrap();
        assert_eq!(sorted.insert(Value::Int(2)).unwrap(), None);
        assert_eq!(sorted.len(), 1);
    }

    #[test]
    fn test_list_positional_ops() {
        let mut c = Collection::new(CollectionType::list(ElemType::Prim(PrimType::Str)));
        c.insert_at(0, Value::str("a")).unwrap();
        c.insert_at(1, Value::str("c")).unwrap();
        c.insert_at(1, Value::str("b")).unwrap();
        assert_eq!(c.remove_at(0).unwrap(), Value::str("a"));
        assert_eq!(c.set_at(1, Value::str("z")).unwrap(), Value::str("c"));
        assert_eq!(c.values(), vec![Value::str("b"), Value::str("z")]);
        assert!(matches!(
            c.insert_at(5, Value::str("x")),
            Err(ModelError::IndexOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_element_type_checked() {
        let mut c = Collection::new(CollectionType::list(ElemType::Prim(PrimType::Int)));
        assert!(matches!(
            c.insert(Value::str("nope")),
            Err(ModelError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_map_keys_checked() {
        let mut m = Collection::new(CollectionType::str_map(ElemType::Prim(PrimType::Int)));
        assert_eq!(m.put(MapKey::from("k"), Value::Int(1)).unwrap(), None);
        assert_eq!(
            m.put(MapKey::from("k"), Value::Int(2)).unwrap(),
            Some(Value::Int(1))
        );
        assert!(m.put(MapKey::Int(1), Value::Int(3)).is_err());
        assert!(m.insert(Value::Int(3)).is_err());
        assert_eq!(m.remove_key(&MapKey::from("k")).unwrap(), Some(Value::Int(2)));
        assert!(m.is_empty());
    }

    #[test]
    fn test_ops_rejected_by_the_wrong_shape() {
        let mut m = Collection::new(CollectionType::str_map(ElemType::Prim(PrimType::Int)));
        assert!(matches!(
            m.remove_value(&Value::Int(1)),
            Err(ModelError::WrongCollectionOp { op: "remove_value", .. })
        ));
        assert!(matches!(
            m.insert(Value::Int(1)),
            Err(ModelError::WrongCollectionOp { op: "insert", .. })
        ));

        let mut l = Collection::new(CollectionType::list(ElemType::Prim(PrimType::Int)));
        assert!(matches!(
            l.put(MapKey::from("k"), Value::Int(1)),
            Err(ModelError::TypeMismatch { .. })
        ));
        assert!(matches!(
            l.remove_key(&MapKey::from("k")),
            Err(ModelError::WrongCollectionOp { op: "remove_key", .. })
        ));
        l.insert(Value::Int(4)).unwrap();
        assert_eq!(ints(&l), vec![4]);
    }
}

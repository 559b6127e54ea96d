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

//! Live objects as the interpreter sees them.

use crate::model::collection::check_elem;
use crate::model::{
    AttrKind, Collection, CollectionType, ElemType, Identity, ModelError, ObjRef, TypeDef,
    TypeTag, Value,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

/// What an object is an instance of.
#[derive(Debug, Clone)]
pub enum ObjectClass {
    Instance(Arc<TypeDef>),
    /// An independent collection: a collection that is itself an object.
    Collection(CollectionType),
}

/// The in-memory content of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    One(Value),
    Many(Collection),
}

#[derive(Default, Clone, Copy)]
struct Persistence {
    identity: Option<Identity>,
    stored: bool,
}

#[derive(Default)]
struct ObjectState {
    slots: HashMap<String, Slot>,
    elements: Option<Collection>,
}

// Identity sits under its own lock: comparing references reads it while a collection closure
// holds the state lock of the owning object, which may be the same object.
struct ObjectCell {
    class: ObjectClass,
    persistence: RwLock<Persistence>,
    state: RwLock<ObjectState>,
}

/// A shared handle to a live object. Clones alias the same object.
#[derive(Clone)]
pub struct Object(Arc<ObjectCell>);

/// Non-owning handle, as held by the runtime object cache.
#[derive(Clone)]
pub struct WeakObject(Weak<ObjectCell>);

impl WeakObject {
    pub fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(Object)
    }
}

impl Object {
    /// A transient instance of `def`, with every multi-valued attribute initialised empty.
    pub fn new(def: Arc<TypeDef>) -> Self {
        let slots = def
            .all_attrs()
            .filter_map(|(_, a)| match &a.kind {
                AttrKind::Many(ct) => Some((a.name.clone(), Slot::Many(Collection::new(ct.clone())))),
                _ => None,
            })
            .collect();
        Self(Arc::new(ObjectCell {
            class: ObjectClass::Instance(def),
            persistence: RwLock::default(),
            state: RwLock::new(ObjectState {
                slots,
                ..Default::default()
            }),
        }))
    }

    pub fn new_collection(ty: CollectionType) -> Self {
        let elements = Some(Collection::new(ty.clone()));
        Self(Arc::new(ObjectCell {
            class: ObjectClass::Collection(ty),
            persistence: RwLock::default(),
            state: RwLock::new(ObjectState {
                elements,
                ..Default::default()
            }),
        }))
    }

    /// Give a transient object a pre-existing identity, e.g. one minted by another store.
    /// Ignored once the object is stored.
    pub fn assign_identity(&self, identity: Identity) {
        let mut p = self.0.persistence.write();
        if !p.stored {
            p.identity = Some(identity);
        }
    }

    pub fn class(&self) -> &ObjectClass {
        &self.0.class
    }

    pub fn type_def(&self) -> Option<&Arc<TypeDef>> {
        match &self.0.class {
            ObjectClass::Instance(def) => Some(def),
            ObjectClass::Collection(_) => None,
        }
    }

    pub fn collection_type(&self) -> Option<&CollectionType> {
        match &self.0.class {
            ObjectClass::Instance(_) => None,
            ObjectClass::Collection(ct) => Some(ct),
        }
    }

    pub fn type_tag(&self) -> TypeTag {
        match &self.0.class {
            ObjectClass::Instance(def) => TypeTag::Ordinary(def.short_name.clone()),
            ObjectClass::Collection(ct) => TypeTag::Collection(ct.clone()),
        }
    }

    /// Human-readable type name for diagnostics.
    pub fn type_name(&self) -> String {
        match &self.0.class {
            ObjectClass::Instance(def) => def.full_name.clone(),
            ObjectClass::Collection(ct) => ct.descriptor(),
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.0.persistence.read().identity
    }

    pub fn db_id(&self) -> Option<i64> {
        self.identity().map(|i| i.db_id())
    }

    pub fn is_stored(&self) -> bool {
        self.0.persistence.read().stored
    }

    pub fn mark_stored(&self, identity: Identity) {
        *self.0.persistence.write() = Persistence {
            identity: Some(identity),
            stored: true,
        };
    }

    /// Back to transient, after deletion. The identity is kept so a later re-persist reuses it.
    pub fn mark_unstored(&self) {
        self.0.persistence.write().stored = false;
    }

    fn attr_kind(&self, attr: &str) -> Result<&AttrKind, ModelError> {
        let def = self.type_def().ok_or_else(|| ModelError::UnknownAttribute {
            type_name: self.type_name(),
            attr: attr.to_string(),
        })?;
        def.find_attr(attr)
            .map(|(_, a)| &a.kind)
            .ok_or_else(|| ModelError::UnknownAttribute {
                type_name: def.full_name.clone(),
                attr: attr.to_string(),
            })
    }

    /// Current value of a single-valued attribute, `None` when unset.
    pub fn get(&self, attr: &str) -> Result<Option<Value>, ModelError> {
        if let AttrKind::Many(_) = self.attr_kind(attr)? {
            return Err(ModelError::NotSingleValued(attr.to_string()));
        }
        Ok(match self.0.state.read().slots.get(attr) {
            Some(Slot::One(v)) => Some(v.clone()),
            _ => None,
        })
    }

    /// Assign a single-valued attribute, returning the previous value.
    pub fn set(&self, attr: &str, value: Value) -> Result<Option<Value>, ModelError> {
        match self.attr_kind(attr)? {
            AttrKind::Prim(p) => check_elem(attr, &ElemType::Prim(*p), &value)?,
            AttrKind::Ref(t) => check_elem(attr, &ElemType::Ref(t.clone()), &value)?,
            AttrKind::Many(_) => return Err(ModelError::NotSingleValued(attr.to_string())),
        }
        let previous = self
            .0
            .state
            .write()
            .slots
            .insert(attr.to_string(), Slot::One(value));
        Ok(match previous {
            Some(Slot::One(v)) => Some(v),
            _ => None,
        })
    }

    pub fn unset(&self, attr: &str) -> Result<Option<Value>, ModelError> {
        if let AttrKind::Many(_) = self.attr_kind(attr)? {
            return Err(ModelError::NotSingleValued(attr.to_string()));
        }
        Ok(match self.0.state.write().slots.remove(attr) {
            Some(Slot::One(v)) => Some(v),
            _ => None,
        })
    }

    /// Snapshot of a multi-valued attribute.
    pub fn collection(&self, attr: &str) -> Result<Collection, ModelError> {
        self.with_collection(attr, |c| Ok(c.clone()))
    }

    /// Run `f` against a multi-valued attribute under the object's write lock.
    pub fn with_collection<R>(
        &self,
        attr: &str,
        f: impl FnOnce(&mut Collection) -> Result<R, ModelError>,
    ) -> Result<R, ModelError> {
        let AttrKind::Many(ct) = self.attr_kind(attr)? else {
            return Err(ModelError::NotACollection(attr.to_string()));
        };
        let mut state = self.0.state.write();
        let slot = state
            .slots
            .entry(attr.to_string())
            .or_insert_with(|| Slot::Many(Collection::new(ct.clone())));
        match slot {
            Slot::Many(c) => f(c),
            Slot::One(_) => Err(ModelError::NotACollection(attr.to_string())),
        }
    }

    /// Run `f` against the elements of an independent collection.
    pub fn with_elements<R>(
        &self,
        f: impl FnOnce(&mut Collection) -> Result<R, ModelError>,
    ) -> Result<R, ModelError> {
        let mut state = self.0.state.write();
        match state.elements.as_mut() {
            Some(c) => f(c),
            None => Err(ModelError::NotACollection(self.type_name())),
        }
    }

    pub fn elements(&self) -> Option<Collection> {
        self.0.state.read().elements.clone()
    }

    pub fn slots_snapshot(&self) -> Vec<(String, Slot)> {
        self.0
            .state
            .read()
            .slots
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Install a slot decoded from the store, bypassing validation.
    pub fn restore_slot(&self, attr: &str, slot: Slot) {
        self.0.state.write().slots.insert(attr.to_string(), slot);
    }

    pub fn restore_elements(&self, elements: Collection) {
        self.0.state.write().elements = Some(elements);
    }

    /// Replace every reference slot holding a proxy for `db_id` with `resolved`.
    pub fn swap_proxy(&self, attr: &str, resolved: &Object) {
        let Some(id) = resolved.db_id() else {
            return;
        };
        let mut state = self.0.state.write();
        if let Some(Slot::One(Value::Ref(r @ ObjRef::Proxy(_)))) = state.slots.get_mut(attr)
            && r.db_id() == Some(id)
        {
            *r = ObjRef::Resolved(resolved.clone());
        }
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.0))
    }
}

impl Debug for Object {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.db_id() {
            Some(id) => write!(f, "Object({} #{id})", self.type_name()),
            None => write!(f, "Object({} transient)", self.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PrimType, TypeDecl, TypeRegistry, Uid};

    fn car_type() -> Arc<TypeDef> {
        let registry = TypeRegistry::default();
        registry.register_package("vehicles", "vehicles").unwrap();
        registry
            .define(
                TypeDecl::new("vehicles.Car")
                    .prim("speed", PrimType::Int)
                    .prim("name", PrimType::Str)
                    .many("tags", CollectionType::list(ElemType::Prim(PrimType::Str))),
            )
            .unwrap()
            .0
    }

    #[test]
    fn test_set_validates_kind() {
        let car = Object::new(car_type());
        assert_eq!(car.set("speed", Value::Int(120)).unwrap(), None);
        assert_eq!(car.get("speed").unwrap(), Some(Value::Int(120)));
        assert!(matches!(
            car.set("speed", Value::str("fast")),
            Err(ModelError::TypeMismatch { .. })
        ));
        assert!(matches!(
            car.set("wheels", Value::Int(4)),
            Err(ModelError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            car.set("tags", Value::Int(4)),
            Err(ModelError::NotSingleValued(_))
        ));
    }

    #[test]
    fn test_collections_start_empty() {
        let car = Object::new(car_type());
        car.with_collection("tags", |c| c.insert(Value::str("red")))
            .unwrap();
        assert_eq!(car.collection("tags").unwrap().values(), vec![Value::str("red")]);
    }

    #[test]
    fn test_identity_fixed_once_stored() {
        let car = Object::new(car_type());
        assert!(!car.is_stored());
        let identity = Identity::new(Uid::new(7, 8));
        car.mark_stored(identity);
        car.assign_identity(Identity::new(Uid::new(1, 2)));
        assert_eq!(car.db_id(), Some(7));
        assert!(car.is_stored());
    }

    #[test]
    fn test_clones_alias() {
        let a = Object::new(car_type());
        let b = a.clone();
        b.set("speed", Value::Int(3)).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.get("speed").unwrap(), Some(Value::Int(3)));
        assert!(a.downgrade().upgrade().is_some());
    }
}

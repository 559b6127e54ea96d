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

//! Mapping of whole objects onto the `Object` table, the type tables of their lattice, and the
//! relation tables of their non-primitive attributes.

use crate::collection_codec::{RelationTable, attr_decl};
use crate::connection::{Connection, SqlValue, column};
use crate::error::NotFound;
use crate::schema::{load_packages, quote};
use crate::value_codec::{decode, decode_ref, encode, null_values, value_columns};
use crate::{DbError, Gateway};
use mica_common::{
    AttrKind, Collection, Identity, ModelError, ObjRef, Object, ObjectClass, PrimType, Slot,
    TypeDef, TypeTag, Uid, Value, split_type_name,
};
use rusqlite::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

struct ProjectedAttr<'a> {
    level: usize,
    attr: &'a str,
    prim: PrimType,
    width: usize,
}

/// The primitive columns of every level of a type lattice, selected through one join per level
/// on the anchoring object id. Level `n` is aliased `t{n+1}`.
pub(crate) struct Projection<'a> {
    levels: Vec<&'a TypeDef>,
    attrs: Vec<ProjectedAttr<'a>>,
}

impl<'a> Projection<'a> {
    pub(crate) fn new(def: &'a TypeDef) -> Self {
        let levels: Vec<_> = def.lattice().collect();
        let mut attrs = vec![];
        for (level, t) in levels.iter().enumerate() {
            for a in &t.attrs {
                if let AttrKind::Prim(p) = &a.kind {
                    let width = value_columns(&a.name, *p).len();
                    if width > 0 {
                        attrs.push(ProjectedAttr {
                            level,
                            attr: &a.name,
                            prim: *p,
                            width,
                        });
                    }
                }
            }
        }
        Self { levels, attrs }
    }

    pub(crate) fn alias(level: usize) -> String {
        format!("t{}", level + 1)
    }

    /// The lattice level whose table hosts primitive attribute `attr`.
    pub(crate) fn level_of(&self, attr: &str) -> Option<usize> {
        self.attrs.iter().find(|a| a.attr == attr).map(|a| a.level)
    }

    pub(crate) fn columns(&self) -> Vec<String> {
        self.attrs
            .iter()
            .flat_map(|a| {
                let alias = Self::alias(a.level);
                value_columns(a.attr, a.prim)
                    .into_iter()
                    .map(move |(c, _)| format!("{alias}.{}", quote(&c)))
            })
            .collect()
    }

    pub(crate) fn width(&self) -> usize {
        self.attrs.iter().map(|a| a.width).sum()
    }

    /// `JOIN` clauses bringing in every level's table, keyed on `anchor`.
    pub(crate) fn joins(&self, anchor: &str) -> String {
        self.levels
            .iter()
            .enumerate()
            .map(|(level, t)| {
                let alias = Self::alias(level);
                format!(" JOIN {} {alias} ON {alias}.id = {anchor}", quote(&t.short_name))
            })
            .collect()
    }

    /// Install the columns starting at `start` into `obj`'s slots. NULLs leave the slot unset.
    pub(crate) fn decode_into(&self, row: &Row<'_>, start: usize, obj: &Object) -> Result<(), DbError> {
        let mut idx = start;
        for a in &self.attrs {
            if let Some(v) = decode(row, idx, a.prim, a.attr)? {
                obj.restore_slot(a.attr, Slot::One(v));
            }
            idx += a.width;
        }
        Ok(())
    }
}

fn stored_id(obj: &Object) -> Option<i64> {
    obj.db_id().filter(|_| obj.is_stored())
}

const PERSIST_SAVEPOINT: &str = "persist_object";

fn int(i: i64) -> SqlValue {
    SqlValue::Integer(i)
}

impl Gateway {
    /// Make `obj` persistent if it is not already, along with everything it references.
    /// Returns its database id.
    ///
    /// The object is flagged stored and cached before its references are followed, so cycles
    /// terminate. All rows are written under one savepoint: on failure none of them remain, and
    /// neither `obj` nor anything persisted on its behalf stays flagged stored.
    pub fn ensure_persisted(&self, obj: &Object) -> Result<i64, DbError> {
        if let Some(id) = stored_id(obj) {
            return Ok(id);
        }
        self.with_connection(|conn| {
            match obj.class() {
                ObjectClass::Instance(def) => self.ensure_lattice_tables(def)?,
                ObjectClass::Collection(ct) => self.ensure_collection_table(ct)?,
            }
            let mark = self.persisting.borrow().len();
            let tables_mark = self.created_tables.borrow().len();
            conn.execute_batch(&format!("SAVEPOINT {PERSIST_SAVEPOINT}"))?;
            let depth = self.persist_depth.get();
            self.persist_depth.set(depth + 1);
            let written = self.write_new_object(conn, obj).and_then(|id| {
                conn.execute_batch(&format!("RELEASE {PERSIST_SAVEPOINT}"))?;
                Ok(id)
            });
            self.persist_depth.set(depth);
            match written {
                Ok(id) => {
                    if depth == 0 {
                        self.persisting.borrow_mut().clear();
                    } else {
                        self.persisting.borrow_mut().push(obj.clone());
                    }
                    if conn.is_autocommit() {
                        self.settle_created_tables(true);
                    }
                    debug!(id, type_name = %obj.type_name(), "Persisted object");
                    Ok(id)
                }
                Err(e) => {
                    let undo = format!(
                        "ROLLBACK TO {PERSIST_SAVEPOINT}; RELEASE {PERSIST_SAVEPOINT}"
                    );
                    if let Err(undo_err) = conn.execute_batch(&undo) {
                        warn!(error = %undo_err, "Failed to roll back partially persisted object");
                    }
                    self.created_tables.borrow_mut().truncate(tables_mark);
                    let unwound = self.persisting.borrow_mut().split_off(mark);
                    for o in unwound.iter().chain(std::iter::once(obj)) {
                        if let Some(id) = stored_id(o) {
                            self.db.cache().remove(id);
                        }
                        o.mark_unstored();
                    }
                    Err(e)
                }
            }
        })
    }

    fn write_new_object(&self, conn: &Connection, obj: &Object) -> Result<i64, DbError> {
        let identity = self.insert_object_row(conn, obj)?;
        let id = identity.db_id();
        obj.mark_stored(identity);
        self.db.cache().insert(id, obj);
        self.write_object_rows(conn, obj, id)?;
        Ok(id)
    }

    /// Insert the `Object` row. An identity minted elsewhere is tried as is, then reversed;
    /// otherwise fresh random ids are drawn until one does not collide.
    fn insert_object_row(&self, conn: &Connection, obj: &Object) -> Result<Identity, DbError> {
        let type_name = obj.type_tag().encode();
        let insert = |identity: Identity| -> Result<Identity, DbError> {
            conn.execute(
                "INSERT INTO Object (id, id2, flags, typeName) VALUES (?, ?, ?, ?)",
                &[
                    int(identity.db_id()),
                    int(identity.companion()),
                    int(identity.flags()),
                    SqlValue::Text(type_name.clone()),
                ],
            )?;
            Ok(identity)
        };

        if let Some(identity) = obj.identity() {
            match insert(identity) {
                Err(e) if e.is_key_collision() => {}
                other => return other,
            }
            debug!(uid = %identity.uid(), "Object id collides, reversing halves");
            return match insert(identity.reversed()) {
                Err(e) if e.is_key_collision() => Err(DbError::Integrity(format!(
                    "both halves of object id {} are already in use",
                    identity.uid()
                ))),
                other => other,
            };
        }

        let attempts = self.db.config().max_id_attempts;
        for _ in 0..attempts {
            match insert(Identity::new(Uid::random())) {
                Err(e) if e.is_key_collision() => continue,
                other => return other,
            }
        }
        Err(DbError::Integrity(format!(
            "no unused object id found in {attempts} attempts"
        )))
    }

    fn write_object_rows(&self, conn: &Connection, obj: &Object, id: i64) -> Result<(), DbError> {
        let def = match obj.class() {
            ObjectClass::Instance(def) => def,
            ObjectClass::Collection(ct) => {
                let elements = obj
                    .elements()
                    .ok_or_else(|| ModelError::NotACollection(obj.type_name()))?;
                return self.insert_all(conn, &RelationTable::for_collection(ct), id, &elements);
            }
        };
        let slots: HashMap<String, Slot> = obj.slots_snapshot().into_iter().collect();

        for t in def.lattice() {
            let mut columns = vec!["id".to_string()];
            let mut params = vec![int(id)];
            for a in &t.attrs {
                let AttrKind::Prim(p) = &a.kind else {
                    continue;
                };
                columns.extend(value_columns(&a.name, *p).into_iter().map(|(c, _)| quote(&c)));
                match slots.get(&a.name) {
                    Some(Slot::One(v)) if *p != PrimType::Mutex => params.extend(encode(v)?),
                    _ => params.extend(null_values(*p)),
                }
            }
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(&t.short_name),
                    columns.join(", "),
                    vec!["?"; columns.len()].join(", ")
                ),
                &params,
            )?;
        }

        for (t, a) in def.all_attrs() {
            let Some(table) = RelationTable::for_attr(t, a) else {
                continue;
            };
            match slots.get(&a.name) {
                Some(Slot::One(Value::Ref(r))) => {
                    let target = self.persist_ref(r)?;
                    conn.execute(
                        &format!("INSERT INTO {} (id0, \"id1\") VALUES (?, ?)", table.quoted()),
                        &[int(id), int(target)],
                    )?;
                }
                Some(Slot::Many(coll)) => self.insert_all(conn, &table, id, coll)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Write the current value of single-valued attribute `attr` of a persistent object.
    pub fn persist_set_attr(&self, obj: &Object, attr: &str) -> Result<(), DbError> {
        let Some(id) = stored_id(obj) else {
            return Ok(());
        };
        let (def, decl) = attr_decl(obj, attr)?;
        let value = obj.get(attr)?;
        match &decl.kind {
            AttrKind::Prim(p) => {
                let params = match &value {
                    Some(v) if *p != PrimType::Mutex => encode(v)?,
                    _ => null_values(*p),
                };
                self.update_columns(def, attr, *p, params, id)
            }
            AttrKind::Ref(_) => {
                let Some(Value::Ref(r)) = value else {
                    return self.persist_remove_attr(obj, attr);
                };
                let target = self.persist_ref(&r)?;
                let table = RelationTable::for_attr(def, decl)
                    .ok_or_else(|| ModelError::NotSingleValued(attr.to_string()))?;
                self.with_connection(|conn| {
                    self.ensure_relation_table(conn, &table)?;
                    let updated = conn.execute(
                        &format!("UPDATE {} SET \"id1\" = ? WHERE id0 = ?", table.quoted()),
                        &[int(target), int(id)],
                    )?;
                    if updated == 0 {
                        conn.execute(
                            &format!("INSERT INTO {} (id0, \"id1\") VALUES (?, ?)", table.quoted()),
                            &[int(id), int(target)],
                        )?;
                    }
                    Ok(())
                })
            }
            AttrKind::Many(_) => Err(ModelError::NotSingleValued(attr.to_string()).into()),
        }
    }

    fn update_columns(
        &self,
        def: &TypeDef,
        attr: &str,
        p: PrimType,
        mut params: Vec<SqlValue>,
        id: i64,
    ) -> Result<(), DbError> {
        let columns = value_columns(attr, p);
        if columns.is_empty() {
            return Ok(());
        }
        let sets = columns
            .iter()
            .map(|(c, _)| format!("{} = ?", quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        params.push(int(id));
        self.with_connection(|conn| {
            conn.execute(
                &format!("UPDATE {} SET {sets} WHERE id = ?", quote(&def.short_name)),
                &params,
            )?;
            Ok(())
        })
    }

    /// Clear single-valued attribute `attr` in the store: NULL its columns, or delete its
    /// reference row.
    pub fn persist_remove_attr(&self, obj: &Object, attr: &str) -> Result<(), DbError> {
        let Some(id) = stored_id(obj) else {
            return Ok(());
        };
        let (def, decl) = attr_decl(obj, attr)?;
        match &decl.kind {
            AttrKind::Prim(p) => self.update_columns(def, attr, *p, null_values(*p), id),
            AttrKind::Ref(_) => {
                let Some(table) = RelationTable::for_attr(def, decl) else {
                    return Ok(());
                };
                self.with_connection(|conn| {
                    self.ensure_relation_table(conn, &table)?;
                    conn.execute(&table.clear_sql(), &[int(id)])?;
                    Ok(())
                })
            }
            AttrKind::Many(_) => Err(ModelError::NotSingleValued(attr.to_string()).into()),
        }
    }

    /// Clear attribute `attr` in the store, whether single- or multi-valued.
    pub fn persist_clear_attr(&self, obj: &Object, attr: &str) -> Result<(), DbError> {
        let (_, decl) = attr_decl(obj, attr)?;
        match decl.kind {
            AttrKind::Many(_) => self.persist_clear(crate::Target::Attr(obj, attr)),
            _ => self.persist_remove_attr(obj, attr),
        }
    }

    /// Assign a single-valued attribute and write it through. A reference to a transient
    /// object from a persistent one persists the target.
    pub fn set_attr(&self, obj: &Object, attr: &str, value: Value) -> Result<Option<Value>, DbError> {
        let previous = obj.set(attr, value)?;
        self.persist_set_attr(obj, attr)?;
        Ok(previous)
    }

    /// Unset a single-valued attribute, or empty a multi-valued one, and write it through.
    pub fn clear_attr(&self, obj: &Object, attr: &str) -> Result<(), DbError> {
        let (_, decl) = attr_decl(obj, attr)?;
        if let AttrKind::Many(_) = decl.kind {
            return self.clear(crate::Target::Attr(obj, attr));
        }
        obj.unset(attr)?;
        self.persist_remove_attr(obj, attr)
    }

    /// The object with database id `id`. References are followed `radius` levels deep; beyond
    /// that they are left as proxies. A cached live object is returned as is.
    pub fn fetch(&self, id: i64, radius: u32) -> Result<Object, DbError> {
        if let Some(obj) = self.db.cache().get(id) {
            return Ok(obj);
        }
        self.with_connection(|conn| {
            let row = conn.query_opt(
                "SELECT id2, flags, typeName FROM Object WHERE id = ?",
                &[int(id)],
                |row| {
                    Ok((
                        column::<i64>(row, 0)?,
                        column::<i64>(row, 1)?,
                        column::<String>(row, 2)?,
                    ))
                },
            )?;
            let Some((id2, flags, type_name)) = row else {
                return Err(DbError::NotFound(NotFound::Object(id)));
            };
            self.materialize(conn, Identity::from_row(id, id2, flags), &type_name, radius)
        })
    }

    /// Build the live object for an `Object` row. The object is cached before its attributes
    /// are read so that cyclic references resolve to it.
    pub(crate) fn materialize(
        &self,
        conn: &Connection,
        identity: Identity,
        type_name: &str,
        radius: u32,
    ) -> Result<Object, DbError> {
        let id = identity.db_id();
        let fresh = match TypeTag::parse(type_name)? {
            TypeTag::Ordinary(short) => Object::new(self.resolve_type(conn, &short)?),
            TypeTag::Collection(ct) => Object::new_collection(ct),
        };
        fresh.mark_stored(identity);
        let obj = self.db.cache().insert(id, &fresh);
        if !obj.ptr_eq(&fresh) {
            return Ok(obj);
        }
        if let Err(e) = self.load_object(conn, &obj, id, radius) {
            self.db.cache().remove(id);
            return Err(e);
        }
        Ok(obj)
    }

    fn load_object(&self, conn: &Connection, obj: &Object, id: i64, radius: u32) -> Result<(), DbError> {
        let def = match obj.class() {
            ObjectClass::Collection(ct) => {
                let table = RelationTable::for_collection(ct);
                let elements = self.load_collection(conn, &table, ct, id, radius)?;
                obj.restore_elements(elements);
                return Ok(());
            }
            ObjectClass::Instance(def) => def.clone(),
        };

        let projection = Projection::new(&def);
        if projection.width() > 0 {
            if let Some(missing) = self.missing_lattice_table(conn, &def)? {
                return Err(DbError::Integrity(format!(
                    "object #{id} is stored as {} but table {missing} does not exist",
                    def.full_name
                )));
            }
            let sql = format!(
                "SELECT {} FROM Object ro{} WHERE ro.id = ?",
                projection.columns().join(", "),
                projection.joins("ro.id")
            );
            let found = conn.query_opt(&sql, &[int(id)], |row| projection.decode_into(row, 0, obj))?;
            if found.is_none() {
                return Err(DbError::Integrity(format!(
                    "object #{id} is missing a row in a table of {}",
                    def.full_name
                )));
            }
        }
        self.load_references(conn, obj, &def, id, radius)
    }

    /// Fill the reference and multi-valued slots of an instance of `def`.
    pub(crate) fn load_references(
        &self,
        conn: &Connection,
        obj: &Object,
        def: &TypeDef,
        id: i64,
        radius: u32,
    ) -> Result<(), DbError> {
        for (t, a) in def.all_attrs() {
            let Some(table) = RelationTable::for_attr(t, a) else {
                continue;
            };
            match &a.kind {
                AttrKind::Ref(_) => {
                    if let Some(r) = self.load_single_ref(conn, &table, id, radius)? {
                        obj.restore_slot(&a.name, Slot::One(Value::Ref(r)));
                    }
                }
                AttrKind::Many(ct) => {
                    let coll = self.load_collection(conn, &table, ct, id, radius)?;
                    obj.restore_slot(&a.name, Slot::Many(coll));
                }
                AttrKind::Prim(_) => {}
            }
        }
        Ok(())
    }

    /// The reference stored for a single-valued attribute. A target that no longer exists
    /// reads as unset when `radius` asks for it to be fetched.
    fn load_single_ref(
        &self,
        conn: &Connection,
        table: &RelationTable,
        owner: i64,
        radius: u32,
    ) -> Result<Option<ObjRef>, DbError> {
        if !self.table_exists(conn, table.name())? {
            return Ok(None);
        }
        let stored = conn.query_opt(
            &format!("SELECT \"id1\" FROM {} WHERE id0 = ?", table.quoted()),
            &[int(owner)],
            |row| decode_ref(row, 0, table.name()),
        )?;
        let Some(Some(ObjRef::Proxy(target))) = stored else {
            return Ok(None);
        };
        if radius == 0 {
            return Ok(Some(ObjRef::Proxy(target)));
        }
        match self.fetch(target, radius - 1) {
            Ok(o) => Ok(Some(ObjRef::Resolved(o))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The registered type for short name `short`. Unknown types are loaded through the code
    /// loader by full name, recovered from the `Package` table.
    fn resolve_type(&self, conn: &Connection, short: &str) -> Result<Arc<TypeDef>, DbError> {
        let registry = self.db.registry();
        if let Some(def) = registry.by_short(short) {
            return Ok(def);
        }
        let not_found = || DbError::NotFound(NotFound::Type(short.to_string()));
        let full = match split_type_name(short) {
            (Some(pkg_short), simple) => {
                if registry.package_full(pkg_short).is_none() {
                    load_packages(conn, registry)?;
                }
                let package = registry.package_full(pkg_short).ok_or_else(not_found)?;
                format!("{package}.{simple}")
            }
            (None, simple) => simple.to_string(),
        };
        let Some(loader) = self.db.loader() else {
            return Err(not_found());
        };
        debug!(type_name = %full, "Loading type for fetch");
        loader.load_type(&full, self)?;
        registry.by_short(short).ok_or_else(not_found)
    }

    /// Read attribute `attr` of `obj` from the store and install it on the live object.
    /// Returns `None` for an unset primitive; an unset reference is `NotFound::Attribute`.
    /// Transient objects answer from memory.
    pub fn fetch_attribute(&self, obj: &Object, attr: &str, radius: u32) -> Result<Option<Slot>, DbError> {
        let (def, decl) = attr_decl(obj, attr)?;
        let Some(id) = stored_id(obj) else {
            return Ok(match &decl.kind {
                AttrKind::Many(_) => Some(Slot::Many(obj.collection(attr)?)),
                _ => obj.get(attr)?.map(Slot::One),
            });
        };
        let slot = self.with_connection(|conn| match &decl.kind {
            AttrKind::Prim(p) => {
                let columns = value_columns(attr, *p);
                if columns.is_empty() {
                    return Ok(None);
                }
                let names: Vec<_> = columns.iter().map(|(c, _)| quote(c)).collect();
                let sql = format!(
                    "SELECT {} FROM {} WHERE id = ?",
                    names.join(", "),
                    quote(&def.short_name)
                );
                let value = conn.query_opt(&sql, &[int(id)], |row| decode(row, 0, *p, attr))?;
                Ok(value.flatten().map(Slot::One))
            }
            AttrKind::Ref(_) => {
                let table = RelationTable::for_attr(def, decl)
                    .ok_or_else(|| ModelError::NotSingleValued(attr.to_string()))?;
                match self.load_single_ref(conn, &table, id, radius)? {
                    Some(r) => Ok(Some(Slot::One(Value::Ref(r)))),
                    None => Err(DbError::NotFound(NotFound::Attribute {
                        owner: id,
                        attr: attr.to_string(),
                    })),
                }
            }
            AttrKind::Many(ct) => {
                let table = RelationTable::for_attr(def, decl)
                    .ok_or_else(|| ModelError::NotACollection(attr.to_string()))?;
                let coll: Collection = self.load_collection(conn, &table, ct, id, radius)?;
                Ok(Some(Slot::Many(coll)))
            }
        })?;
        match &slot {
            Some(s) => obj.restore_slot(attr, s.clone()),
            None => {
                obj.unset(attr)?;
            }
        }
        Ok(slot)
    }

    /// The live object behind a reference: cache first, then the store.
    pub fn resolve(&self, r: &ObjRef, radius: u32) -> Result<Object, DbError> {
        match r {
            ObjRef::Resolved(o) => Ok(o.clone()),
            ObjRef::Proxy(id) => self.fetch(*id, radius),
        }
    }

    /// Resolve single-valued reference attribute `attr`, replacing a proxy in the slot with
    /// the live object.
    pub fn resolve_attr(&self, obj: &Object, attr: &str, radius: u32) -> Result<Option<Object>, DbError> {
        let Some(Value::Ref(r)) = obj.get(attr)? else {
            return Ok(None);
        };
        let target = self.resolve(&r, radius)?;
        obj.swap_proxy(attr, &target);
        Ok(Some(target))
    }

    /// Remove a persistent object: its names, its rows in every type table of its lattice, the
    /// rows it owns in its relation tables, and its `Object` row. Rows elsewhere that refer to
    /// it are left in place. A transient object is left untouched.
    pub fn delete(&self, obj: &Object) -> Result<(), DbError> {
        let Some(id) = stored_id(obj) else {
            return Ok(());
        };
        self.with_connection(|conn| {
            let params = [int(id)];
            conn.execute("DELETE FROM Name WHERE id = ?", &params)?;
            match obj.class() {
                ObjectClass::Instance(def) => {
                    self.ensure_lattice_tables(def)?;
                    for t in def.lattice() {
                        conn.execute(
                            &format!("DELETE FROM {} WHERE id = ?", quote(&t.short_name)),
                            &params,
                        )?;
                    }
                    for (t, a) in def.all_attrs() {
                        if let Some(table) = RelationTable::for_attr(t, a) {
                            conn.execute(&table.clear_sql(), &params)?;
                        }
                    }
                }
                ObjectClass::Collection(ct) => {
                    self.ensure_collection_table(ct)?;
                    conn.execute(&RelationTable::for_collection(ct).clear_sql(), &params)?;
                }
            }
            conn.execute("DELETE FROM Object WHERE id = ?", &params)?;
            Ok(())
        })?;
        self.db.cache().remove(id);
        obj.mark_unstored();
        debug!(id, "Deleted object");
        Ok(())
    }
}

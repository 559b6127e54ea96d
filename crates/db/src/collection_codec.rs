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

//! Rows of multi-valued attributes, single-valued reference attributes and independent
//! collections.
//!
//! Every such relation has its own table: an owner column (`id0` when elements are objects,
//! `id` when they are primitives), the value columns (`id1` or the `val*` columns), and for
//! kinds that need one a position column, `ord1` (dense index, or integer key) or `key1`
//! (string key).

use crate::connection::{Connection, SqlValue, column};
use crate::schema::quote;
use crate::value_codec::{decode, decode_ref, encode, value_columns};
use crate::{DbError, Gateway};
use mica_common::{
    AttrDecl, AttrKind, Collection, CollectionKind, CollectionType, ElemType, Identity, KeyType,
    MapKey, ModelError, ObjRef, Object, PrimType, TypeDef, Uid, Value,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Shape {
    /// A single-valued reference attribute: at most one row per owner.
    Single,
    Many(CollectionType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelationTable {
    name: String,
    quoted: String,
    shape: Shape,
}

/// Value of the position column of one row.
#[derive(Debug, Clone, PartialEq)]
enum Position {
    None,
    Ord(i64),
    Key(String),
}

impl Position {
    fn of_key(key: &MapKey) -> Self {
        match key {
            MapKey::Int(i) => Position::Ord(*i),
            MapKey::Str(s) => Position::Key(s.clone()),
        }
    }

    fn sql(&self) -> Option<SqlValue> {
        match self {
            Position::None => None,
            Position::Ord(i) => Some(SqlValue::Integer(*i)),
            Position::Key(k) => Some(SqlValue::Text(k.clone())),
        }
    }
}

impl RelationTable {
    fn new(name: String, shape: Shape) -> Self {
        Self {
            quoted: quote(&name),
            name,
            shape,
        }
    }

    /// The table backing `attr` as declared on `def`; `None` for primitive single values.
    pub(crate) fn for_attr(def: &TypeDef, attr: &AttrDecl) -> Option<Self> {
        let shape = match &attr.kind {
            AttrKind::Prim(_) => return None,
            AttrKind::Ref(_) => Shape::Single,
            AttrKind::Many(ct) => Shape::Many(ct.clone()),
        };
        Some(Self::new(def.attribute_table(&attr.name), shape))
    }

    pub(crate) fn for_collection(ct: &CollectionType) -> Self {
        Self::new(ct.descriptor(), Shape::Many(ct.clone()))
    }

    /// Rebuild from a `Relation` row.
    pub(crate) fn from_descriptor(name: &str, descriptor: &str) -> Result<Self, DbError> {
        let shape = if descriptor.starts_with('[') {
            Shape::Many(CollectionType::parse(descriptor)?)
        } else {
            Shape::Single
        };
        Ok(Self::new(name.to_string(), shape))
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn descriptor(&self) -> String {
        match &self.shape {
            Shape::Single => "ref".to_string(),
            Shape::Many(ct) => ct.descriptor(),
        }
    }

    pub(crate) fn holds_refs(&self) -> bool {
        match &self.shape {
            Shape::Single => true,
            Shape::Many(ct) => ct.elem().is_ref(),
        }
    }

    fn kind(&self) -> Option<CollectionKind> {
        match &self.shape {
            Shape::Single => None,
            Shape::Many(ct) => Some(ct.kind()),
        }
    }

    /// Whether `ord1` holds a dense `0..n-1` index per owner.
    pub(crate) fn is_positional(&self) -> bool {
        self.kind().is_some_and(|k| k.is_positional())
    }

    pub(crate) fn owner_col(&self) -> &'static str {
        if self.holds_refs() { "id0" } else { "id" }
    }

    fn elem_prim(&self) -> Option<PrimType> {
        match &self.shape {
            Shape::Many(ct) => match ct.elem() {
                ElemType::Prim(p) => Some(*p),
                ElemType::Ref(_) => None,
            },
            Shape::Single => None,
        }
    }

    fn value_cols(&self) -> Vec<(String, &'static str)> {
        match self.elem_prim() {
            Some(p) => value_columns("val", p),
            None => vec![("id1".to_string(), "INTEGER")],
        }
    }

    fn pos_col(&self) -> Option<&'static str> {
        let Shape::Many(ct) = &self.shape else {
            return None;
        };
        match ct.key() {
            Some(KeyType::Str) => Some("key1"),
            Some(KeyType::Int) => Some("ord1"),
            None if ct.kind().is_positional() => Some("ord1"),
            None => None,
        }
    }

    fn index_name(&self, suffix: &str) -> String {
        quote(&format!("{}#{suffix}", self.name))
    }

    pub(crate) fn ddl(&self) -> Vec<String> {
        let owner = self.owner_col();
        let mut columns = vec![format!("{owner} INTEGER NOT NULL")];
        for (name, ty) in self.value_cols() {
            columns.push(format!("{} {ty}", quote(&name)));
        }
        let pos = self.pos_col();
        match pos {
            Some("key1") => columns.push("key1 TEXT NOT NULL".to_string()),
            Some(p) => columns.push(format!("{p} INTEGER NOT NULL")),
            None => {}
        }
        let mut ddl = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quoted,
            columns.join(", ")
        )];
        let keyed = self
            .kind()
            .is_some_and(|k| k.is_map());
        let owner_index = match (&self.shape, pos) {
            (Shape::Single, _) => format!("CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({owner})", self.index_name("owner"), self.quoted),
            (_, Some(p)) if keyed => format!("CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({owner}, {p})", self.index_name("owner"), self.quoted),
            (_, Some(p)) => format!("CREATE INDEX IF NOT EXISTS {} ON {} ({owner}, {p})", self.index_name("owner"), self.quoted),
            (_, None) => format!("CREATE INDEX IF NOT EXISTS {} ON {} ({owner})", self.index_name("owner"), self.quoted),
        };
        ddl.push(owner_index);
        if self.holds_refs() {
            ddl.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (id1)",
                self.index_name("target"),
                self.quoted
            ));
        }
        ddl
    }

    fn value_names(&self) -> Vec<String> {
        self.value_cols().into_iter().map(|(n, _)| quote(&n)).collect()
    }

    fn insert_sql(&self) -> String {
        let mut cols = vec![self.owner_col().to_string()];
        cols.extend(self.value_names());
        cols.extend(self.pos_col().map(str::to_string));
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted,
            cols.join(", "),
            vec!["?"; cols.len()].join(", ")
        )
    }

    fn shift_sql(&self, up: bool) -> String {
        let (op, cmp) = if up { ("+", ">=") } else { ("-", ">") };
        format!(
            "UPDATE {} SET ord1 = ord1 {op} 1 WHERE {} = ? AND ord1 {cmp} ?",
            self.quoted,
            self.owner_col()
        )
    }

    fn pos_predicate(&self) -> Result<String, DbError> {
        let pos = self.pos_col().ok_or_else(|| {
            DbError::Model(ModelError::NotPositional(self.descriptor()))
        })?;
        Ok(format!("{} = ? AND {pos} = ?", self.owner_col()))
    }

    fn delete_at_sql(&self) -> Result<String, DbError> {
        Ok(format!("DELETE FROM {} WHERE {}", self.quoted, self.pos_predicate()?))
    }

    fn update_at_sql(&self) -> Result<String, DbError> {
        let sets = self
            .value_names()
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "UPDATE {} SET {sets} WHERE {}",
            self.quoted,
            self.pos_predicate()?
        ))
    }

    fn delete_value_sql(&self) -> String {
        let matches = self
            .value_names()
            .iter()
            .map(|c| format!(" AND {c} = ?"))
            .collect::<String>();
        format!(
            "DELETE FROM {} WHERE {} = ?{matches}",
            self.quoted,
            self.owner_col()
        )
    }

    pub(crate) fn clear_sql(&self) -> String {
        format!("DELETE FROM {} WHERE {} = ?", self.quoted, self.owner_col())
    }

    fn select_sql(&self) -> String {
        let mut cols = self.value_names();
        let order = match self.pos_col() {
            Some(p) => {
                cols.push(p.to_string());
                p
            }
            None => "rowid",
        };
        format!(
            "SELECT {} FROM {} WHERE {} = ? ORDER BY {order}",
            cols.join(", "),
            self.quoted,
            self.owner_col()
        )
    }

    /// `ord1` values for one owner, in order.
    pub(crate) fn ordinals_sql(&self) -> String {
        format!(
            "SELECT ord1 FROM {} WHERE {} = ? ORDER BY ord1",
            self.quoted,
            self.owner_col()
        )
    }

    pub(crate) fn quoted(&self) -> &str {
        &self.quoted
    }
}

/// A multi-valued attribute of an object, or an independent collection.
#[derive(Clone, Copy)]
pub enum Target<'a> {
    Attr(&'a Object, &'a str),
    Collection(&'a Object),
}

/// How an element leaves a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    /// The element at this index of a positional collection.
    At(usize),
    /// An element of an unordered set.
    Value(Value),
    Key(MapKey),
}

impl<'a> Target<'a> {
    pub fn owner(&self) -> &'a Object {
        match self {
            Target::Attr(o, _) | Target::Collection(o) => o,
        }
    }

    pub(crate) fn table(&self) -> Result<RelationTable, DbError> {
        match self {
            Target::Attr(o, attr) => {
                let (def, decl) = attr_decl(o, attr)?;
                match &decl.kind {
                    AttrKind::Many(_) => RelationTable::for_attr(def, decl)
                        .ok_or_else(|| ModelError::NotACollection(attr.to_string()).into()),
                    _ => Err(ModelError::NotACollection(attr.to_string()).into()),
                }
            }
            Target::Collection(o) => o
                .collection_type()
                .map(RelationTable::for_collection)
                .ok_or_else(|| ModelError::NotACollection(o.type_name()).into()),
        }
    }

    pub(crate) fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Collection) -> Result<R, ModelError>,
    ) -> Result<R, ModelError> {
        match self {
            Target::Attr(o, attr) => o.with_collection(attr, f),
            Target::Collection(o) => o.with_elements(f),
        }
    }

    pub fn snapshot(&self) -> Result<Collection, DbError> {
        Ok(self.mutate(|c| Ok(c.clone()))?)
    }
}

pub(crate) fn attr_decl<'o>(
    obj: &'o Object,
    attr: &str,
) -> Result<(&'o TypeDef, &'o AttrDecl), DbError> {
    let unknown = || ModelError::UnknownAttribute {
        type_name: obj.type_name(),
        attr: attr.to_string(),
    };
    let def = obj.type_def().ok_or_else(unknown)?;
    def.find_attr(attr).ok_or_else(|| unknown().into())
}

fn index_out_of_range(index: usize, len: usize) -> DbError {
    ModelError::IndexOutOfRange { index, len }.into()
}

fn ord(index: usize) -> SqlValue {
    SqlValue::Integer(index as i64)
}

impl Gateway {
    /// Database id of a reference, persisting the referenced object if needed.
    pub(crate) fn persist_ref(&self, r: &ObjRef) -> Result<i64, DbError> {
        match r {
            ObjRef::Resolved(o) => self.ensure_persisted(o),
            ObjRef::Proxy(id) => Ok(*id),
        }
    }

    fn element_values(&self, v: &Value) -> Result<Vec<SqlValue>, DbError> {
        match v {
            Value::Ref(r) => Ok(vec![SqlValue::Integer(self.persist_ref(r)?)]),
            other => encode(other),
        }
    }

    fn insert_row(
        &self,
        conn: &Connection,
        table: &RelationTable,
        owner: i64,
        v: &Value,
        pos: &Position,
    ) -> Result<(), DbError> {
        let mut params = vec![SqlValue::Integer(owner)];
        params.extend(self.element_values(v)?);
        params.extend(pos.sql());
        conn.execute(&table.insert_sql(), &params)?;
        Ok(())
    }

    /// Insert one row per element of `coll`, for an owner with no rows yet.
    pub(crate) fn insert_all(
        &self,
        conn: &Connection,
        table: &RelationTable,
        owner: i64,
        coll: &Collection,
    ) -> Result<(), DbError> {
        if coll.ty().kind().is_map() {
            for (key, v) in coll.entries() {
                self.insert_row(conn, table, owner, &v, &Position::of_key(&key))?;
            }
        } else {
            let positional = coll.ty().kind().is_positional();
            for (i, v) in coll.values().iter().enumerate() {
                let pos = if positional {
                    Position::Ord(i as i64)
                } else {
                    Position::None
                };
                self.insert_row(conn, table, owner, v, &pos)?;
            }
        }
        Ok(())
    }

    /// Owner id and table for a persist operation, or `None` when the owner is transient.
    fn stored_target(&self, target: &Target<'_>) -> Result<Option<(i64, RelationTable)>, DbError> {
        let owner = target.owner();
        match owner.db_id() {
            Some(id) if owner.is_stored() => Ok(Some((id, target.table()?))),
            _ => Ok(None),
        }
    }

    fn with_relation<T: Default>(
        &self,
        target: &Target<'_>,
        f: impl FnOnce(&Connection, i64, &RelationTable) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let Some((owner, table)) = self.stored_target(target)? else {
            return Ok(T::default());
        };
        self.with_connection(|conn| {
            self.ensure_relation_table(conn, &table)?;
            f(conn, owner, &table)
        })
    }

    /// Write the row for the element now at `index` of the in-memory collection. Positional
    /// kinds shift the rows at or after `index` up first, unless the element was appended.
    pub fn persist_insert(&self, target: Target<'_>, index: usize) -> Result<(), DbError> {
        let coll = target.snapshot()?;
        let v = coll
            .get(index)
            .cloned()
            .ok_or_else(|| index_out_of_range(index, coll.len()))?;
        let kind = coll.ty().kind();
        self.with_relation(&target, |conn, owner, table| match kind {
            CollectionKind::Set => self.insert_row(conn, table, owner, &v, &Position::None),
            CollectionKind::List | CollectionKind::SortedList | CollectionKind::SortedSet => {
                if kind.is_sorted() || index + 1 < coll.len() {
                    conn.execute(&table.shift_sql(true), &[SqlValue::Integer(owner), ord(index)])?;
                }
                self.insert_row(conn, table, owner, &v, &Position::Ord(index as i64))
            }
            _ => Err(ModelError::WrongCollectionOp {
                descriptor: coll.ty().descriptor(),
                op: "insert",
            }
            .into()),
        })
    }

    /// Delete the row(s) for an element already removed from the in-memory collection.
    pub fn persist_remove(&self, target: Target<'_>, removal: &Removal) -> Result<(), DbError> {
        self.with_relation(&target, |conn, owner, table| {
            match removal {
                Removal::At(index) => {
                    if !table.is_positional() {
                        return Err(ModelError::NotPositional(table.descriptor()).into());
                    }
                    let params = [SqlValue::Integer(owner), ord(*index)];
                    conn.execute(&table.delete_at_sql()?, &params)?;
                    conn.execute(&table.shift_sql(false), &params)?;
                }
                Removal::Value(v) => {
                    if table.is_positional() {
                        return Err(ModelError::WrongCollectionOp {
                            descriptor: table.descriptor(),
                            op: "remove by value without an index",
                        }
                        .into());
                    }
                    let values = match v {
                        Value::Ref(r) => match r.db_id() {
                            Some(id) => vec![SqlValue::Integer(id)],
                            None => return Ok(()),
                        },
                        other => encode(other)?,
                    };
                    let mut params = vec![SqlValue::Integer(owner)];
                    params.extend(values);
                    conn.execute(&table.delete_value_sql(), &params)?;
                }
                Removal::Key(key) => {
                    let mut params = vec![SqlValue::Integer(owner)];
                    params.extend(Position::of_key(key).sql());
                    conn.execute(&table.delete_at_sql()?, &params)?;
                }
            }
            Ok(())
        })
    }

    /// Rewrite the row at `index` from the in-memory collection.
    pub fn persist_set_element(&self, target: Target<'_>, index: usize) -> Result<(), DbError> {
        let coll = target.snapshot()?;
        let v = coll
            .get(index)
            .cloned()
            .ok_or_else(|| index_out_of_range(index, coll.len()))?;
        self.with_relation(&target, |conn, owner, table| {
            let mut params = self.element_values(&v)?;
            params.push(SqlValue::Integer(owner));
            params.push(ord(index));
            conn.execute(&table.update_at_sql()?, &params)?;
            Ok(())
        })
    }

    /// Write the in-memory value under `key`: an update if a row exists, else an insert.
    pub fn persist_map_put(&self, target: Target<'_>, key: &MapKey) -> Result<(), DbError> {
        let coll = target.snapshot()?;
        let v = coll.get_key(key).cloned().ok_or_else(|| {
            DbError::Model(ModelError::WrongCollectionOp {
                descriptor: coll.ty().descriptor(),
                op: "put of a missing key",
            })
        })?;
        let pos = Position::of_key(key);
        self.with_relation(&target, |conn, owner, table| {
            let mut params = self.element_values(&v)?;
            params.push(SqlValue::Integer(owner));
            params.extend(pos.sql());
            if conn.execute(&table.update_at_sql()?, &params)? == 0 {
                self.insert_row(conn, table, owner, &v, &pos)?;
            }
            Ok(())
        })
    }

    /// Delete every row of the collection, and the owner's rows in the inverse attribute's
    /// table when one is declared.
    pub fn persist_clear(&self, target: Target<'_>) -> Result<(), DbError> {
        let inverse = match target {
            Target::Attr(o, attr) => self.inverse_table(o, attr)?,
            Target::Collection(_) => None,
        };
        self.with_relation(&target, |conn, owner, table| {
            conn.execute(&table.clear_sql(), &[SqlValue::Integer(owner)])?;
            if let Some(inverse) = &inverse {
                conn.execute(
                    &format!("DELETE FROM {} WHERE id1 = ?", inverse.quoted()),
                    &[SqlValue::Integer(owner)],
                )?;
            }
            Ok(())
        })
    }

    /// The table of the attribute declared as the inverse of `attr`, if any.
    pub(crate) fn inverse_table(&self, obj: &Object, attr: &str) -> Result<Option<RelationTable>, DbError> {
        let (_, decl) = attr_decl(obj, attr)?;
        let (Some(inverse), Some(target)) = (&decl.inverse, decl.target_type()) else {
            return Ok(None);
        };
        let Some(target_def) = self.db.registry().by_full(target) else {
            return Ok(None);
        };
        let Some((inv_def, inv_decl)) = target_def.find_attr(inverse) else {
            return Err(DbError::Schema(format!(
                "inverse {inverse} of {attr} is not an attribute of {target}"
            )));
        };
        let table = RelationTable::for_attr(inv_def, inv_decl);
        if let Some(t) = &table {
            self.ensure_attribute_and_relation_tables(inv_def)?;
            if !t.holds_refs() {
                return Err(DbError::Schema(format!(
                    "inverse {inverse} of {attr} does not hold references"
                )));
            }
        }
        Ok(table)
    }

    pub fn persist_add_to_attr(&self, obj: &Object, attr: &str, index: usize) -> Result<(), DbError> {
        self.persist_insert(Target::Attr(obj, attr), index)
    }

    pub fn persist_remove_from_attr(&self, obj: &Object, attr: &str, removal: &Removal) -> Result<(), DbError> {
        self.persist_remove(Target::Attr(obj, attr), removal)
    }

    pub fn persist_set_attr_element(&self, obj: &Object, attr: &str, index: usize) -> Result<(), DbError> {
        self.persist_set_element(Target::Attr(obj, attr), index)
    }

    pub fn persist_add_to_collection(&self, coll: &Object, index: usize) -> Result<(), DbError> {
        self.persist_insert(Target::Collection(coll), index)
    }

    pub fn persist_remove_from_collection(&self, coll: &Object, removal: &Removal) -> Result<(), DbError> {
        self.persist_remove(Target::Collection(coll), removal)
    }

    pub fn persist_set_collection_element(&self, coll: &Object, index: usize) -> Result<(), DbError> {
        self.persist_set_element(Target::Collection(coll), index)
    }

    pub fn persist_clear_collection(&self, coll: &Object) -> Result<(), DbError> {
        self.persist_clear(Target::Collection(coll))
    }

    // Mutations of live collections. Each changes the in-memory collection, then writes the
    // change through when the owner is persistent.

    /// Add `v` where the collection kind puts it. Returns its index, or `None` if a set already
    /// held it.
    pub fn insert(&self, target: Target<'_>, v: Value) -> Result<Option<usize>, DbError> {
        if let Value::Ref(ObjRef::Resolved(elem)) = &v
            && !elem.is_stored()
            && target.mutate(|c| Ok(c.ty().kind().is_sorted()))?
        {
            self.settle_sort_identity(target.owner(), elem)?;
        }
        let index = target.mutate(|c| c.insert(v))?;
        if let Some(index) = index {
            self.persist_insert(target, index)?;
        }
        Ok(index)
    }

    /// Sorted kinds order references by database id, so a transient element needs the id it
    /// will keep before its position is chosen. Under a persistent owner it is persisted
    /// outright; otherwise it is given a fresh identity.
    fn settle_sort_identity(&self, owner: &Object, elem: &Object) -> Result<(), DbError> {
        if owner.is_stored() {
            self.ensure_persisted(elem)?;
        } else if elem.identity().is_none() {
            elem.assign_identity(Identity::new(Uid::random()));
        }
        Ok(())
    }

    pub fn insert_at(&self, target: Target<'_>, index: usize, v: Value) -> Result<(), DbError> {
        target.mutate(|c| c.insert_at(index, v))?;
        self.persist_insert(target, index)
    }

    pub fn remove_at(&self, target: Target<'_>, index: usize) -> Result<Value, DbError> {
        let removed = target.mutate(|c| c.remove_at(index))?;
        self.persist_remove(target, &Removal::At(index))?;
        Ok(removed)
    }

    /// Remove the first element equal to `v`. Returns whether one was present.
    pub fn remove_value(&self, target: Target<'_>, v: &Value) -> Result<bool, DbError> {
        let (positional, index) = target.mutate(|c| {
            let positional = c.ty().kind().is_positional();
            c.remove_value(v).map(|i| (positional, i))
        })?;
        let Some(index) = index else {
            return Ok(false);
        };
        let removal = if positional {
            Removal::At(index)
        } else {
            Removal::Value(v.clone())
        };
        self.persist_remove(target, &removal)?;
        Ok(true)
    }

    pub fn set_element(&self, target: Target<'_>, index: usize, v: Value) -> Result<Value, DbError> {
        let previous = target.mutate(|c| c.set_at(index, v))?;
        self.persist_set_element(target, index)?;
        Ok(previous)
    }

    pub fn map_put(&self, target: Target<'_>, key: MapKey, v: Value) -> Result<Option<Value>, DbError> {
        let previous = target.mutate(|c| c.put(key.clone(), v))?;
        self.persist_map_put(target, &key)?;
        Ok(previous)
    }

    pub fn map_remove(&self, target: Target<'_>, key: &MapKey) -> Result<Option<Value>, DbError> {
        let removed = target.mutate(|c| c.remove_key(key))?;
        if removed.is_some() {
            self.persist_remove(target, &Removal::Key(key.clone()))?;
        }
        Ok(removed)
    }

    pub fn clear(&self, target: Target<'_>) -> Result<(), DbError> {
        target.mutate(|c| {
            c.clear();
            Ok(())
        })?;
        self.persist_clear(target)
    }

    /// Read the elements stored for `owner`. Reference elements are proxies at radius 0 and
    /// fetched with `radius - 1` otherwise; elements whose object no longer exists are dropped,
    /// except in positional kinds, where they stay as proxies to keep indexes aligned with
    /// `ord1`.
    pub(crate) fn load_collection(
        &self,
        conn: &Connection,
        table: &RelationTable,
        ty: &CollectionType,
        owner: i64,
        radius: u32,
    ) -> Result<Collection, DbError> {
        if !self.table_exists(conn, table.name())? {
            return Ok(Collection::new(ty.clone()));
        }
        let prim = table.elem_prim();
        let width = prim.map(crate::value_codec::column_count).unwrap_or(1);
        let key = ty.key();
        let rows = conn.query(&table.select_sql(), &[SqlValue::Integer(owner)], |row| {
            let value = match prim {
                Some(p) => decode(row, 0, p, table.name())?,
                None => decode_ref(row, 0, table.name())?.map(Value::Ref),
            };
            let key = match key {
                Some(KeyType::Int) => Some(MapKey::Int(column(row, width)?)),
                Some(KeyType::Str) => Some(MapKey::Str(column(row, width)?)),
                None => None,
            };
            Ok((value, key))
        })?;

        let keep_dangling = ty.kind().is_positional();
        let mut resolved = Vec::with_capacity(rows.len());
        for (value, key) in rows {
            let value = match value {
                Some(Value::Ref(ObjRef::Proxy(id))) if radius > 0 => match self.fetch(id, radius - 1) {
                    Ok(o) => Some(Value::Ref(ObjRef::Resolved(o))),
                    Err(e) if e.is_not_found() && keep_dangling => {
                        Some(Value::Ref(ObjRef::Proxy(id)))
                    }
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                },
                other => other,
            };
            if let Some(value) = value {
                resolved.push((value, key));
            }
        }

        let ty = ty.clone();
        let coll = if ty.kind().is_map() {
            Collection::from_entries(
                ty,
                resolved.into_iter().filter_map(|(v, k)| k.map(|k| (k, v))),
            )?
        } else {
            Collection::from_seq(ty, resolved.into_iter().map(|(v, _)| v).collect())?
        };
        Ok(coll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_common::{TypeDecl, TypeRegistry};
    use pretty_assertions::assert_eq;

    fn person() -> std::sync::Arc<TypeDef> {
        let registry = TypeRegistry::default();
        registry.register_package("people", "people").unwrap();
        registry
            .define(
                TypeDecl::new("people.Person")
                    .reference("car", "people.Car")
                    .many("nicknames", CollectionType::list(ElemType::Prim(PrimType::Str)))
                    .many(
                        "friends",
                        CollectionType::str_map(ElemType::Ref("people.Person".to_string())),
                    ),
            )
            .unwrap()
            .0
    }

    fn table(def: &TypeDef, attr: &str) -> RelationTable {
        let (_, decl) = def.find_attr(attr).unwrap();
        RelationTable::for_attr(def, decl).unwrap()
    }

    #[test]
    fn test_single_reference_shape() {
        let def = person();
        let t = table(&def, "car");
        assert_eq!(t.name(), "people.Person.car");
        assert_eq!(t.insert_sql(), "INSERT INTO \"people.Person.car\" (id0, \"id1\") VALUES (?, ?)");
        assert!(t.ddl()[1].starts_with("CREATE UNIQUE INDEX"));
    }

    #[test]
    fn test_primitive_list_shape() {
        let def = person();
        let t = table(&def, "nicknames");
        assert_eq!(t.owner_col(), "id");
        assert!(t.is_positional());
        assert_eq!(
            t.ddl()[0],
            "CREATE TABLE IF NOT EXISTS \"people.Person.nicknames\" \
             (id INTEGER NOT NULL, \"val\" TEXT, ord1 INTEGER NOT NULL)"
        );
        assert_eq!(
            t.shift_sql(true),
            "UPDATE \"people.Person.nicknames\" SET ord1 = ord1 + 1 WHERE id = ? AND ord1 >= ?"
        );
        assert!(t.ddl()[1].starts_with("CREATE INDEX"));
    }

    #[test]
    fn test_string_map_is_unique_per_key() {
        let def = person();
        let t = table(&def, "friends");
        assert_eq!(
            t.select_sql(),
            "SELECT \"id1\", key1 FROM \"people.Person.friends\" WHERE id0 = ? ORDER BY key1"
        );
        assert!(t.ddl()[1].contains("UNIQUE INDEX"));
        assert!(t.ddl()[1].ends_with("(id0, key1)"));
    }

    #[test]
    fn test_descriptor_roundtrip_through_relation_rows() {
        let ct = CollectionType::list(ElemType::Prim(PrimType::Int));
        let t = RelationTable::for_collection(&ct);
        assert_eq!(t.name(), "[list<int>]");
        assert_eq!(RelationTable::from_descriptor(t.name(), &t.descriptor()).unwrap(), t);
        let single = RelationTable::from_descriptor("a.B.c", "ref").unwrap();
        assert!(single.holds_refs());
        assert!(!single.is_positional());
    }
}

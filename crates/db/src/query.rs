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

//! Translation of OQL where-clauses into SQL over the type tables, and `fetch_n`.
//!
//! OQL is a SQL where-clause whose lower-case identifiers name primitive attributes of the root
//! type, or `ref.attr` for a primitive attribute of an object referenced by a single-valued
//! attribute. String literals are set aside before identifiers are scanned and put back
//! afterwards, so their contents are never rewritten.

use crate::collection_codec::{RelationTable, Target};
use crate::connection::{SqlValue, column};
use crate::object_codec::Projection;
use crate::schema::quote;
use crate::value_codec::bind_arg;
use crate::{DbError, Gateway};
use mica_common::{AttrKind, Identity, ObjRef, Object, PrimType, TypeDef, TypeRegistry, Value};
use std::sync::Arc;
use tracing::trace;

const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "is", "null", "like", "order", "by", "asc", "desc", "between",
    "true", "false", "escape",
];

/// Marks the position of a set-aside string literal in stripped text.
const LITERAL_MARK: char = '\u{0}';

/// A persistent collection of objects that restricts a query to its members.
pub(crate) struct Scope {
    table: RelationTable,
    owner: i64,
}

#[derive(Debug)]
pub(crate) struct QueryPlan {
    pub(crate) sql: String,
    /// Every table the query reads besides `Object`.
    pub(crate) tables: Vec<String>,
}

struct Translator<'a> {
    root: &'a TypeDef,
    registry: &'a TypeRegistry,
    expression: &'a str,
    projection: Projection<'a>,
    /// Reference attributes traversed, with their quoted relation table; joined as `jt{n}`.
    ref_joins: Vec<(String, String)>,
    /// (attribute, table of the target type hosting the column, alias).
    target_joins: Vec<(String, String, String)>,
    tables: Vec<String>,
}

impl<'a> Translator<'a> {
    fn error(&self, message: impl Into<String>) -> DbError {
        DbError::Query {
            expression: self.expression.to_string(),
            root_type: self.root.full_name.clone(),
            message: message.into(),
        }
    }

    fn bare(&self, name: &str) -> Result<String, DbError> {
        let Some((_, decl)) = self.root.find_attr(name) else {
            return Err(self.error(format!("unknown attribute {name}")));
        };
        let AttrKind::Prim(p) = &decl.kind else {
            return Err(self.error(format!("{name} is not a primitive attribute")));
        };
        if matches!(p, PrimType::Complex | PrimType::Mutex) {
            return Err(self.error(format!("{name} has type {} and cannot be queried", p.name())));
        }
        let level = self
            .projection
            .level_of(name)
            .ok_or_else(|| self.error(format!("{name} has no column")))?;
        Ok(format!("{}.{}", Projection::alias(level), quote(name)))
    }

    fn dotted(&mut self, via: &str, name: &str) -> Result<String, DbError> {
        let root = self.root;
        let Some((owner_def, decl)) = root.find_attr(via) else {
            return Err(self.error(format!("unknown attribute {via}")));
        };
        let target = match &decl.kind {
            AttrKind::Ref(target) => target.clone(),
            AttrKind::Prim(_) => {
                return Err(self.error(format!(
                    "{via} is a primitive attribute and cannot be dereferenced"
                )));
            }
            AttrKind::Many(_) => {
                return Err(self.error(format!("{via} is multi-valued and cannot be dereferenced")));
            }
        };
        let Some(target_def) = self.registry.by_full(&target) else {
            return Err(self.error(format!("{via} refers to unknown type {target}")));
        };
        let Some((host, target_decl)) = target_def.find_attr(name) else {
            return Err(self.error(format!("unknown attribute {name} of {target}")));
        };
        match &target_decl.kind {
            AttrKind::Prim(PrimType::Complex | PrimType::Mutex) | AttrKind::Ref(_) | AttrKind::Many(_) => {
                return Err(self.error(format!("{via}.{name} is not a queryable primitive attribute")));
            }
            AttrKind::Prim(_) => {}
        }
        let host_table = host.short_name.clone();
        let join_table = RelationTable::for_attr(owner_def, decl)
            .ok_or_else(|| self.error(format!("{via} has no relation table")))?;

        if !self.ref_joins.iter().any(|(a, _)| a == via) {
            self.ref_joins
                .push((via.to_string(), join_table.quoted().to_string()));
            self.tables.push(join_table.name().to_string());
        }
        let ot = match self
            .target_joins
            .iter()
            .find(|(a, t, _)| a == via && *t == host_table)
        {
            Some((_, _, alias)) => alias.clone(),
            None => {
                let alias = format!("ot{}", self.target_joins.len() + 1);
                self.tables.push(host_table.clone());
                self.target_joins
                    .push((via.to_string(), host_table, alias.clone()));
                alias
            }
        };
        Ok(format!("{ot}.{}", quote(name)))
    }

    /// Rewrite every attribute reference in `text`, which has had its literals set aside.
    fn rewrite(&mut self, text: &str) -> Result<String, DbError> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == LITERAL_MARK {
                let end = chars[i + 1..]
                    .iter()
                    .position(|c| *c == LITERAL_MARK)
                    .map(|p| i + 1 + p)
                    .ok_or_else(|| self.error("malformed literal marker"))?;
                out.extend(&chars[i..=end]);
                i = end + 1;
                continue;
            }
            if c.is_ascii_digit() {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                out.extend(&chars[start..i]);
                continue;
            }
            if !(c.is_alphabetic() || c == '_') {
                out.push(c);
                i += 1;
                continue;
            }

            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            let dotted_tail = if i + 1 < chars.len()
                && chars[i] == '.'
                && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_')
            {
                let tail_start = i + 1;
                let mut j = tail_start;
                while j < chars.len() && is_ident_char(chars[j]) {
                    j += 1;
                }
                Some((chars[tail_start..j].iter().collect::<String>(), j))
            } else {
                None
            };
            let called = chars[i..]
                .iter()
                .find(|c| !c.is_whitespace())
                .is_some_and(|c| *c == '(');

            if let Some((tail, end)) = dotted_tail {
                out.push_str(&self.dotted(&ident, &tail)?);
                i = end;
            } else if c.is_uppercase()
                || called
                || RESERVED.contains(&ident.to_ascii_lowercase().as_str())
            {
                out.push_str(&ident);
            } else {
                out.push_str(&self.bare(&ident)?);
            }
        }
        Ok(out)
    }

    fn joins(&self) -> String {
        let mut joins = self.projection.joins("ro.id");
        for (i, (via, table)) in self.ref_joins.iter().enumerate() {
            let jt = format!("jt{}", i + 1);
            joins.push_str(&format!(" JOIN {table} {jt} ON {jt}.id0 = ro.id"));
            for (_, host, ot) in self.target_joins.iter().filter(|(a, _, _)| a == via) {
                joins.push_str(&format!(" JOIN {} {ot} ON {ot}.id = {jt}.id1", quote(host)));
            }
        }
        joins
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Set aside single-quoted literals (with `''` escapes), leaving numbered markers.
fn strip_literals(oql: &str) -> Result<(String, Vec<String>), String> {
    let mut stripped = String::with_capacity(oql.len());
    let mut literals = vec![];
    let mut chars = oql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            stripped.push(c);
            continue;
        }
        let mut literal = String::from('\'');
        loop {
            match chars.next() {
                Some('\'') if chars.peek() == Some(&'\'') => {
                    chars.next();
                    literal.push_str("''");
                }
                Some('\'') => {
                    literal.push('\'');
                    break;
                }
                Some(c) => literal.push(c),
                None => return Err("unterminated string literal".to_string()),
            }
        }
        stripped.push(LITERAL_MARK);
        stripped.push_str(&literals.len().to_string());
        stripped.push(LITERAL_MARK);
        literals.push(literal);
    }
    Ok((stripped, literals))
}

fn restore_literals(text: &str, literals: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut parts = text.split(LITERAL_MARK);
    if let Some(first) = parts.next() {
        out.push_str(first);
    }
    while let Some(index) = parts.next() {
        if let Some(literal) = index.parse::<usize>().ok().and_then(|i| literals.get(i)) {
            out.push_str(literal);
        }
        if let Some(rest) = parts.next() {
            out.push_str(rest);
        }
    }
    out
}

/// Split at a top-level `ORDER BY`, returning the condition and the ordering terms.
fn split_order_by(text: &str) -> (&str, Option<&str>) {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'o' if depth == 0
                && lower[i..].starts_with("order")
                && (i == 0 || !is_ident_char(char::from(bytes[i - 1]))) =>
            {
                let rest = &lower[i + 5..];
                let trimmed = rest.trim_start();
                let gap = rest.len() - trimmed.len();
                if gap > 0
                    && trimmed.starts_with("by")
                    && !trimmed[2..].starts_with(|c: char| is_ident_char(c))
                {
                    let terms_start = i + 5 + gap + 2;
                    return (&text[..i], Some(&text[terms_start..]));
                }
            }
            _ => {}
        }
        i += 1;
    }
    (text, None)
}

/// Build the SQL for a query over `root` and its subtypes. With `ids_only` the result is the
/// `Object` id column alone; otherwise it is the `Object` row followed by the root lattice's
/// primitive columns, in `Projection` order.
pub(crate) fn translate(
    root: &TypeDef,
    registry: &TypeRegistry,
    oql: &str,
    scope: Option<&Scope>,
    ids_only: bool,
) -> Result<QueryPlan, DbError> {
    let mut translator = Translator {
        root,
        registry,
        expression: oql,
        projection: Projection::new(root),
        ref_joins: vec![],
        target_joins: vec![],
        tables: root.lattice().map(|t| t.short_name.clone()).collect(),
    };
    let (stripped, literals) = strip_literals(oql).map_err(|m| translator.error(m))?;
    let (condition, order) = split_order_by(&stripped);
    let condition = translator.rewrite(condition)?;
    let order = order.map(|o| translator.rewrite(o)).transpose()?;

    let mut select = vec!["ro.id".to_string()];
    if !ids_only {
        select.extend(["ro.id2", "ro.flags", "ro.typeName"].map(str::to_string));
        select.extend(translator.projection.columns());
    }
    let mut sql = format!("SELECT {} FROM Object ro{}", select.join(", "), translator.joins());

    let mut clauses = vec![];
    if let Some(scope) = scope {
        translator.tables.push(scope.table.name().to_string());
        sql.push_str(&format!(
            " JOIN {} ctbl ON ctbl.id1 = ro.id",
            scope.table.quoted()
        ));
        clauses.push(format!("ctbl.{} = {}", scope.table.owner_col(), scope.owner));
    }
    let condition = condition.trim();
    if !condition.is_empty() {
        clauses.push(format!("({})", restore_literals(condition, &literals)));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    match order.as_deref().map(str::trim) {
        Some(terms) if !terms.is_empty() => {
            sql.push_str(" ORDER BY ");
            sql.push_str(&restore_literals(terms, &literals));
        }
        _ => {
            if scope.is_some_and(|s| s.table.is_positional()) {
                sql.push_str(" ORDER BY ctbl.ord1");
            }
        }
    }
    Ok(QueryPlan {
        sql,
        tables: translator.tables,
    })
}

enum Hit {
    Cached(Object),
    Decoded(Object),
    Deferred(Identity, String),
}

impl Gateway {
    fn scope(&self, def: &TypeDef, oql: &str, target: Target<'_>) -> Result<Scope, DbError> {
        let error = |message: &str| DbError::Query {
            expression: oql.to_string(),
            root_type: def.full_name.clone(),
            message: message.to_string(),
        };
        let owner = target.owner();
        let Some(owner_id) = owner.db_id().filter(|_| owner.is_stored()) else {
            return Err(error("scope collection is not persistent"));
        };
        let table = target.table()?;
        if !table.holds_refs() {
            return Err(error("scope collection does not hold objects"));
        }
        Ok(Scope {
            table,
            owner: owner_id,
        })
    }

    /// Instances of `def` (or any subtype) satisfying `oql`, optionally restricted to the
    /// members of a persistent collection. At radius 0 the results are proxies and the
    /// returned flag is true; otherwise every result is a live object fetched to `radius`.
    pub fn fetch_n(
        &self,
        def: &Arc<TypeDef>,
        oql: &str,
        args: &[Value],
        scope: Option<Target<'_>>,
        radius: u32,
    ) -> Result<(Vec<ObjRef>, bool), DbError> {
        let scope = scope.map(|t| self.scope(def, oql, t)).transpose()?;
        let ids_only = radius == 0;
        let plan = translate(def, self.db.registry(), oql, scope.as_ref(), ids_only)?;
        let params = args.iter().map(bind_arg).collect::<Result<Vec<SqlValue>, _>>()?;
        trace!(oql, sql = %plan.sql, "Translated query");

        self.with_connection(|conn| {
            // A table that was never created holds no rows, and every table here is inner-joined.
            for table in &plan.tables {
                if !self.table_exists(conn, table)? {
                    trace!(table = %table, "Query reads a table that does not exist yet");
                    return Ok((vec![], ids_only));
                }
            }

            if ids_only {
                let ids = conn.query(&plan.sql, &params, |row| column::<i64>(row, 0))?;
                return Ok((ids.into_iter().map(ObjRef::Proxy).collect(), true));
            }

            let projection = Projection::new(def);
            let hits = conn.query(&plan.sql, &params, |row| {
                let id = column::<i64>(row, 0)?;
                if let Some(obj) = self.db.cache().get(id) {
                    return Ok(Hit::Cached(obj));
                }
                let identity = Identity::from_row(id, column(row, 1)?, column(row, 2)?);
                let type_name = column::<String>(row, 3)?;
                if type_name != def.short_name {
                    return Ok(Hit::Deferred(identity, type_name));
                }
                let obj = Object::new(def.clone());
                obj.mark_stored(identity);
                projection.decode_into(row, 4, &obj)?;
                Ok(Hit::Decoded(obj))
            })?;

            let mut results = Vec::with_capacity(hits.len());
            for hit in hits {
                let obj = match hit {
                    Hit::Cached(obj) => obj,
                    Hit::Decoded(fresh) => {
                        let Some(id) = fresh.db_id() else {
                            continue;
                        };
                        let obj = self.db.cache().insert(id, &fresh);
                        if obj.ptr_eq(&fresh)
                            && let Err(e) = self.load_references(conn, &obj, def, id, radius)
                        {
                            self.db.cache().remove(id);
                            return Err(e);
                        }
                        obj
                    }
                    Hit::Deferred(identity, type_name) => {
                        self.materialize(conn, identity, &type_name, radius)?
                    }
                };
                results.push(ObjRef::Resolved(obj));
            }
            Ok((results, false))
        })
    }
}

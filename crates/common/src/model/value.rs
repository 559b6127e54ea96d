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

use crate::model::Object;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};

/// A point in time together with the IANA location it should be presented in.
pub type Timestamp = chrono::DateTime<chrono_tz::Tz>;

/// The fixed repertoire of primitive attribute types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PrimType {
    Int,
    Float,
    Bool,
    Str,
    Time,
    Complex,
    /// Runtime-only synchronisation slot. Never persisted.
    Mutex,
}

impl PrimType {
    pub fn name(&self) -> &'static str {
        match self {
            PrimType::Int => "int",
            PrimType::Float => "float",
            PrimType::Bool => "bool",
            PrimType::Str => "string",
            PrimType::Time => "time",
            PrimType::Complex => "complex",
            PrimType::Mutex => "mutex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let t = match s {
            "int" => PrimType::Int,
            "float" => PrimType::Float,
            "bool" => PrimType::Bool,
            "string" => PrimType::Str,
            "time" => PrimType::Time,
            "complex" => PrimType::Complex,
            "mutex" => PrimType::Mutex,
            _ => return None,
        };
        Some(t)
    }

    pub fn is_persistable(&self) -> bool {
        !matches!(self, PrimType::Mutex)
    }
}

impl Display for PrimType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// A reference to another object: either the live object, or a placeholder carrying only its
/// database id, to be materialised on next access.
#[derive(Clone)]
pub enum ObjRef {
    Resolved(Object),
    Proxy(i64),
}

impl ObjRef {
    pub fn db_id(&self) -> Option<i64> {
        match self {
            ObjRef::Resolved(o) => o.db_id(),
            ObjRef::Proxy(id) => Some(*id),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, ObjRef::Proxy(_))
    }

    pub fn object(&self) -> Option<&Object> {
        match self {
            ObjRef::Resolved(o) => Some(o),
            ObjRef::Proxy(_) => None,
        }
    }
}

impl From<Object> for ObjRef {
    fn from(o: Object) -> Self {
        ObjRef::Resolved(o)
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        if let (ObjRef::Resolved(a), ObjRef::Resolved(b)) = (self, other)
            && a.ptr_eq(b)
        {
            return true;
        }
        match (self.db_id(), other.db_id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Debug for ObjRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjRef::Resolved(o) => write!(f, "{o:?}"),
            ObjRef::Proxy(id) => write!(f, "Proxy(#{id})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Time(Timestamp),
    Complex(Complex),
    Ref(ObjRef),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn obj(o: &Object) -> Self {
        Value::Ref(ObjRef::Resolved(o.clone()))
    }

    pub fn prim_type(&self) -> Option<PrimType> {
        let t = match self {
            Value::Int(_) => PrimType::Int,
            Value::Float(_) => PrimType::Float,
            Value::Bool(_) => PrimType::Bool,
            Value::Str(_) => PrimType::Str,
            Value::Time(_) => PrimType::Time,
            Value::Complex(_) => PrimType::Complex,
            Value::Ref(_) => return None,
        };
        Some(t)
    }

    pub fn type_name(&self) -> &'static str {
        match self.prim_type() {
            Some(p) => p.name(),
            None => "object",
        }
    }

    pub fn as_obj_ref(&self) -> Option<&ObjRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Complex(_) => 2,
            Value::Str(_) => 3,
            Value::Time(_) => 4,
            Value::Ref(_) => 5,
        }
    }

    /// Total order used by sorted collections. Numbers compare numerically across int and
    /// float, references by database id, and mismatched kinds by a fixed kind rank.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Complex(a), Value::Complex(b)) => {
                a.re.total_cmp(&b.re).then_with(|| a.im.total_cmp(&b.im))
            }
            (Value::Ref(a), Value::Ref(b)) => a.db_id().cmp(&b.db_id()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Time(v)
    }
}

impl From<Complex> for Value {
    fn from(v: Complex) -> Self {
        Value::Complex(v)
    }
}

impl From<ObjRef> for Value {
    fn from(v: ObjRef) -> Self {
        Value::Ref(v)
    }
}

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

//! Column layout and conversion of primitive values.
//!
//! Timestamps take two columns: the instant in UTC, in a fixed-width layout that sorts
//! lexically, and the IANA location it is presented in. Complex numbers take a real and an
//! imaginary column. Mutex slots take none.

use crate::connection::SqlValue;
use crate::DbError;
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use mica_common::{Complex, ObjRef, PrimType, Value};
use rusqlite::Row;
use rusqlite::types::ValueRef;

pub(crate) const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Column name and declared SQL type for each column backing a value of type `p`.
pub(crate) fn value_columns(base: &str, p: PrimType) -> Vec<(String, &'static str)> {
    match p {
        PrimType::Int | PrimType::Bool => vec![(base.to_string(), "INTEGER")],
        PrimType::Float => vec![(base.to_string(), "REAL")],
        PrimType::Str => vec![(base.to_string(), "TEXT")],
        PrimType::Time => vec![
            (base.to_string(), "TEXT"),
            (format!("{base}_loc"), "TEXT"),
        ],
        PrimType::Complex => vec![
            (format!("{base}_r"), "REAL"),
            (format!("{base}_i"), "REAL"),
        ],
        PrimType::Mutex => vec![],
    }
}

pub(crate) fn column_count(p: PrimType) -> usize {
    match p {
        PrimType::Time | PrimType::Complex => 2,
        PrimType::Mutex => 0,
        _ => 1,
    }
}

pub(crate) fn null_values(p: PrimType) -> Vec<SqlValue> {
    vec![SqlValue::Null; column_count(p)]
}

/// The column values for a primitive value.
pub(crate) fn encode(v: &Value) -> Result<Vec<SqlValue>, DbError> {
    let values = match v {
        Value::Int(i) => vec![SqlValue::Integer(*i)],
        Value::Float(f) => vec![SqlValue::Real(*f)],
        Value::Bool(b) => vec![SqlValue::Integer(i64::from(*b))],
        Value::Str(s) => vec![SqlValue::Text(s.clone())],
        Value::Time(t) => vec![
            SqlValue::Text(t.with_timezone(&Utc).format(TIME_LAYOUT).to_string()),
            SqlValue::Text(t.timezone().name().to_string()),
        ],
        Value::Complex(c) => vec![SqlValue::Real(c.re), SqlValue::Real(c.im)],
        Value::Ref(_) => {
            return Err(DbError::Decode {
                column: "<value>".to_string(),
                message: "object references are stored as ids, not value columns".to_string(),
            });
        }
    };
    Ok(values)
}

/// A query argument. Timestamps bind as their UTC column, references as their database id.
pub(crate) fn bind_arg(v: &Value) -> Result<SqlValue, DbError> {
    match v {
        Value::Ref(r) => r.db_id().map(SqlValue::Integer).ok_or_else(|| DbError::Decode {
            column: "<argument>".to_string(),
            message: "cannot bind a reference to a transient object".to_string(),
        }),
        Value::Complex(_) => Err(DbError::Decode {
            column: "<argument>".to_string(),
            message: "complex values cannot be bound as query arguments".to_string(),
        }),
        other => encode(other)?.into_iter().next().ok_or_else(|| DbError::Decode {
            column: "<argument>".to_string(),
            message: format!("{} has no column form", other.type_name()),
        }),
    }
}

fn decode_error(column: &str, message: impl Into<String>) -> DbError {
    DbError::Decode {
        column: column.to_string(),
        message: message.into(),
    }
}

fn raw<'r>(row: &'r Row<'_>, idx: usize, column: &str) -> Result<ValueRef<'r>, DbError> {
    row.get_ref(idx)
        .map_err(|e| decode_error(column, e.to_string()))
}

fn text<'r>(v: ValueRef<'r>, column: &str) -> Result<&'r str, DbError> {
    v.as_str().map_err(|e| decode_error(column, e.to_string()))
}

fn real(v: ValueRef<'_>, column: &str) -> Result<Option<f64>, DbError> {
    Ok(match v {
        ValueRef::Null => None,
        ValueRef::Real(f) => Some(f),
        ValueRef::Integer(i) => Some(i as f64),
        other => Some(
            text(other, column)?
                .trim()
                .parse()
                .map_err(|e: std::num::ParseFloatError| decode_error(column, e.to_string()))?,
        ),
    })
}

/// Decode the value of type `p` whose columns start at `idx`. `None` for NULL columns.
pub(crate) fn decode(
    row: &Row<'_>,
    idx: usize,
    p: PrimType,
    column: &str,
) -> Result<Option<Value>, DbError> {
    let first = match p {
        PrimType::Mutex => return Ok(None),
        _ => raw(row, idx, column)?,
    };
    let value = match (p, first) {
        (PrimType::Complex, first) => {
            let im = raw(row, idx + 1, column)?;
            match (real(first, column)?, real(im, column)?) {
                (Some(re), Some(im)) => Some(Value::Complex(Complex::new(re, im))),
                _ => None,
            }
        }
        (_, ValueRef::Null) => None,
        (PrimType::Int, ValueRef::Integer(i)) => Some(Value::Int(i)),
        (PrimType::Int, ValueRef::Real(f)) => Some(Value::Int(f as i64)),
        (PrimType::Int, other) => Some(Value::Int(
            text(other, column)?
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| decode_error(column, e.to_string()))?,
        )),
        (PrimType::Float, other) => real(other, column)?.map(Value::Float),
        (PrimType::Bool, ValueRef::Integer(i)) => Some(Value::Bool(i != 0)),
        (PrimType::Bool, other) => {
            let t = text(other, column)?;
            Some(Value::Bool(matches!(t, "1" | "true" | "TRUE")))
        }
        (PrimType::Str, ValueRef::Integer(i)) => Some(Value::Str(i.to_string())),
        (PrimType::Str, ValueRef::Real(f)) => Some(Value::Str(f.to_string())),
        (PrimType::Str, other) => Some(Value::Str(text(other, column)?.to_string())),
        (PrimType::Time, other) => {
            let instant = NaiveDateTime::parse_from_str(text(other, column)?, TIME_LAYOUT)
                .map_err(|e| decode_error(column, e.to_string()))?;
            let tz = match raw(row, idx + 1, column)? {
                ValueRef::Null => Tz::UTC,
                loc => text(loc, column)?
                    .parse::<Tz>()
                    .map_err(|e| decode_error(column, e.to_string()))?,
            };
            Some(Value::Time(Utc.from_utc_datetime(&instant).with_timezone(&tz)))
        }
        (PrimType::Mutex, _) => None,
    };
    Ok(value)
}

/// Reference-valued columns decode to proxies; the caller decides whether to resolve them.
pub(crate) fn decode_ref(row: &Row<'_>, idx: usize, column: &str) -> Result<Option<ObjRef>, DbError> {
    match raw(row, idx, column)? {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(id) => Ok(Some(ObjRef::Proxy(id))),
        _ => Err(decode_error(column, "object id is not an integer")),
    }
}

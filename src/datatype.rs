// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

// used for temporal values
use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};

// used to print out readable forms of a data type
use std::fmt;

use crate::error::{EavaultError, Result};

/// Text layout of naive datetimes in storage. The fraction is only written
/// when non-zero and parsing accepts its absence.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Overview and audit timestamps: fixed-width RFC 3339 in UTC, so the text
/// sorts in time order.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| EavaultError::corruption(format!("'{}' is not a timestamp", text)))
}

/// The scalar value kinds a field (or each element of an array field) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    Text,
    Integer,
    Long,
    Float,
    Double,
    DateTime,
    ZonedDateTime,
    Boolean,
    Blob,
}

/// How a kind is represented by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Text,
    Integer,
    Real,
    Blob,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 9] = [
        ScalarKind::Text,
        ScalarKind::Integer,
        ScalarKind::Long,
        ScalarKind::Float,
        ScalarKind::Double,
        ScalarKind::DateTime,
        ScalarKind::ZonedDateTime,
        ScalarKind::Boolean,
        ScalarKind::Blob,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Text => "text",
            ScalarKind::Integer => "integer",
            ScalarKind::Long => "long",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::DateTime => "datetime",
            ScalarKind::ZonedDateTime => "zoned_datetime",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Blob => "blob",
        }
    }

    pub fn storage_class(&self) -> StorageClass {
        match self {
            ScalarKind::Text | ScalarKind::DateTime | ScalarKind::ZonedDateTime => {
                StorageClass::Text
            }
            ScalarKind::Integer | ScalarKind::Long | ScalarKind::Boolean => StorageClass::Integer,
            ScalarKind::Float | ScalarKind::Double => StorageClass::Real,
            ScalarKind::Blob => StorageClass::Blob,
        }
    }

    pub fn from_name(name: &str) -> Option<ScalarKind> {
        ScalarKind::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A typed value held by an entity instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    DateTime(NaiveDateTime),
    ZonedDateTime(DateTime<FixedOffset>),
    Boolean(bool),
    Blob(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Value::Text(_) => ScalarKind::Text,
            Value::Integer(_) => ScalarKind::Integer,
            Value::Long(_) => ScalarKind::Long,
            Value::Float(_) => ScalarKind::Float,
            Value::Double(_) => ScalarKind::Double,
            Value::DateTime(_) => ScalarKind::DateTime,
            Value::ZonedDateTime(_) => ScalarKind::ZonedDateTime,
            Value::Boolean(_) => ScalarKind::Boolean,
            Value::Blob(_) => ScalarKind::Blob,
        }
    }

    /// Empty string, zero, false, empty blob, and "now" for temporal kinds.
    pub fn default_for(kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Text => Value::Text(String::new()),
            ScalarKind::Integer => Value::Integer(0),
            ScalarKind::Long => Value::Long(0),
            ScalarKind::Float => Value::Float(0.0),
            ScalarKind::Double => Value::Double(0.0),
            ScalarKind::DateTime => Value::DateTime(Utc::now().naive_utc()),
            ScalarKind::ZonedDateTime => Value::ZonedDateTime(Utc::now().fixed_offset()),
            ScalarKind::Boolean => Value::Boolean(false),
            ScalarKind::Blob => Value::Blob(Vec::new()),
        }
    }

    pub fn to_sql_value(&self) -> SqlValue {
        match self {
            Value::Text(s) => SqlValue::Text(s.clone()),
            Value::Integer(i) => SqlValue::Integer(i64::from(*i)),
            Value::Long(l) => SqlValue::Integer(*l),
            Value::Float(f) => SqlValue::Real(f64::from(*f)),
            Value::Double(d) => SqlValue::Real(*d),
            Value::DateTime(dt) => SqlValue::Text(dt.format(DATETIME_FORMAT).to_string()),
            Value::ZonedDateTime(dt) => SqlValue::Text(dt.to_rfc3339()),
            Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
            Value::Blob(b) => SqlValue::Blob(b.clone()),
        }
    }

    /// Decodes a value read back from storage as the given kind.
    pub fn from_sql_value(kind: ScalarKind, value: &SqlValue) -> Result<Value> {
        let mismatch = || {
            EavaultError::corruption(format!("cannot read {} as {}", value.type_name(), kind))
        };
        Ok(match (kind, value) {
            (ScalarKind::Text, SqlValue::Text(s)) => Value::Text(s.clone()),
            (ScalarKind::Integer, SqlValue::Integer(i)) => {
                Value::Integer(i32::try_from(*i).map_err(|_| mismatch())?)
            }
            (ScalarKind::Long, SqlValue::Integer(i)) => Value::Long(*i),
            (ScalarKind::Float, SqlValue::Real(r)) => Value::Float(*r as f32),
            (ScalarKind::Float, SqlValue::Integer(i)) => Value::Float(*i as f32),
            (ScalarKind::Double, SqlValue::Real(r)) => Value::Double(*r),
            (ScalarKind::Double, SqlValue::Integer(i)) => Value::Double(*i as f64),
            (ScalarKind::DateTime, SqlValue::Text(s)) => Value::DateTime(
                NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).map_err(|_| mismatch())?,
            ),
            (ScalarKind::ZonedDateTime, SqlValue::Text(s)) => {
                Value::ZonedDateTime(DateTime::parse_from_rfc3339(s).map_err(|_| mismatch())?)
            }
            (ScalarKind::Boolean, SqlValue::Integer(i)) => Value::Boolean(*i != 0),
            (ScalarKind::Blob, SqlValue::Blob(b)) => Value::Blob(b.clone()),
            _ => return Err(mismatch()),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::ZonedDateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A value as bound to, or returned from, a backend statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Blob(_) => "blob",
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            SqlValue::Integer(i) => Ok(*i),
            other => Err(EavaultError::corruption(format!(
                "expected integer, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            SqlValue::Text(s) => Ok(s),
            other => Err(EavaultError::corruption(format!(
                "expected text, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(r) => SqlValue::Real(r),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_owned())
    }
}
impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}
impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}
impl From<usize> for SqlValue {
    fn from(v: usize) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<u32> for SqlValue {
    fn from(i: u32) -> Self {
        SqlValue::Integer(i64::from(i))
    }
}
impl From<&Value> for SqlValue {
    fn from(v: &Value) -> Self {
        v.to_sql_value()
    }
}
impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        v.to_sql_value()
    }
}

/// Rust types that can be stored in a scalar or array slot.
pub trait DataType: Sized + Clone {
    // static stuff which needs to be implemented downstream
    const KIND: ScalarKind;
    fn into_value(self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
    // instance callable with pre-made implementation
    fn kind(&self) -> ScalarKind {
        Self::KIND
    }
}

macro_rules! data_type {
    ($t:ty, $kind:ident) => {
        impl DataType for $t {
            const KIND: ScalarKind = ScalarKind::$kind;
            fn into_value(self) -> Value {
                Value::$kind(self)
            }
            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$kind(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$kind(v)
            }
        }
    };
}

data_type!(String, Text);
data_type!(i32, Integer);
data_type!(i64, Long);
data_type!(f32, Float);
data_type!(f64, Double);
data_type!(NaiveDateTime, DateTime);
data_type!(DateTime<FixedOffset>, ZonedDateTime);
data_type!(bool, Boolean);
data_type!(Vec<u8>, Blob);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

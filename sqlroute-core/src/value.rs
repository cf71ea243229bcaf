//! Statement parameters and results.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value that can be bound into a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    /// Rendered as a comma separated list; nested lists become `(a, b)` groups.
    List(Vec<SqlValue>),
    /// Inserted verbatim, without escaping (e.g. `NOW()`).
    Raw(String),
}

impl SqlValue {
    pub fn raw(sql: impl Into<String>) -> Self {
        SqlValue::Raw(sql.into())
    }
}

macro_rules! impl_from_signed {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SqlValue {
            fn from(v: $ty) -> Self {
                SqlValue::Int(v as i64)
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SqlValue {
            fn from(v: $ty) -> Self {
                SqlValue::UInt(v as u64)
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64, isize);
impl_from_unsigned!(u8, u16, u32, u64, usize);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::Float(v as f64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<Vec<SqlValue>> for SqlValue {
    fn from(v: Vec<SqlValue>) -> Self {
        SqlValue::List(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Parameters bound to a statement.
///
/// Named parameters live in a `BTreeMap` so two maps with the same entries
/// always serialize identically, whatever order they were built in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<SqlValue>),
    Named(BTreeMap<String, SqlValue>),
}

impl Params {
    pub fn positional<V, I>(values: I) -> Self
    where
        V: Into<SqlValue>,
        I: IntoIterator<Item = V>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<SqlValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(map) => map.is_empty(),
        }
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl From<Vec<SqlValue>> for Params {
    fn from(values: Vec<SqlValue>) -> Self {
        Params::Positional(values)
    }
}

impl From<BTreeMap<String, SqlValue>> for Params {
    fn from(map: BTreeMap<String, SqlValue>) -> Self {
        Params::Named(map)
    }
}

/// A result row keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Everything a statement produced: rows for reads, counters for writes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    pub last_insert_id: Option<u64>,
}

impl QueryOutcome {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn affected(rows_affected: u64, last_insert_id: Option<u64>) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
            last_insert_id,
        }
    }

    pub fn first_row(&self) -> Option<&Row> {
        self.rows.first()
    }
}

//! Typed cell values.
//!
//! A column is one cell of a record. It knows its own byte size, which feeds
//! the record's running totals and, through them, channel flow control.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical type tag of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Long,
    Double,
    String,
    Bool,
    /// Milliseconds since the Unix epoch.
    Date,
    Bytes,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Long => "long",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Bool => "bool",
            ColumnType::Date => "date",
            ColumnType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// Raw value held by a column. Every variant is nullable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Long(Option<i64>),
    Double(Option<f64>),
    String(Option<String>),
    Bool(Option<bool>),
    Date(Option<i64>),
    Bytes(Option<Vec<u8>>),
}

impl ColumnValue {
    /// The type tag this value belongs to.
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValue::Long(_) => ColumnType::Long,
            ColumnValue::Double(_) => ColumnType::Double,
            ColumnValue::String(_) => ColumnType::String,
            ColumnValue::Bool(_) => ColumnType::Bool,
            ColumnValue::Date(_) => ColumnType::Date,
            ColumnValue::Bytes(_) => ColumnType::Bytes,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            ColumnValue::Long(None)
                | ColumnValue::Double(None)
                | ColumnValue::String(None)
                | ColumnValue::Bool(None)
                | ColumnValue::Date(None)
                | ColumnValue::Bytes(None)
        )
    }

    /// Serialized size of this value in bytes. Null values are free.
    pub fn byte_size(&self) -> usize {
        match self {
            ColumnValue::Long(Some(_)) | ColumnValue::Double(Some(_)) => 8,
            ColumnValue::Date(Some(_)) => 8,
            ColumnValue::Bool(Some(_)) => 1,
            ColumnValue::String(Some(s)) => s.len(),
            ColumnValue::Bytes(Some(b)) => b.len(),
            _ => 0,
        }
    }
}

/// A single typed cell.
///
/// The byte size is cached and recomputed on every [`Column::set_value`], so
/// reading it is free and never stale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    #[serde(rename = "type")]
    column_type: ColumnType,
    value: ColumnValue,
    byte_size: usize,
}

impl Column {
    /// Create a column from a raw value.
    pub fn new(value: ColumnValue) -> Self {
        Self {
            column_type: value.column_type(),
            byte_size: value.byte_size(),
            value,
        }
    }

    /// A null column of the given type.
    pub fn null(column_type: ColumnType) -> Self {
        let value = match column_type {
            ColumnType::Long => ColumnValue::Long(None),
            ColumnType::Double => ColumnValue::Double(None),
            ColumnType::String => ColumnValue::String(None),
            ColumnType::Bool => ColumnValue::Bool(None),
            ColumnType::Date => ColumnValue::Date(None),
            ColumnType::Bytes => ColumnValue::Bytes(None),
        };
        Self::new(value)
    }

    pub fn long(v: i64) -> Self {
        Self::new(ColumnValue::Long(Some(v)))
    }

    pub fn double(v: f64) -> Self {
        Self::new(ColumnValue::Double(Some(v)))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self::new(ColumnValue::String(Some(v.into())))
    }

    pub fn bool(v: bool) -> Self {
        Self::new(ColumnValue::Bool(Some(v)))
    }

    pub fn date(millis: i64) -> Self {
        Self::new(ColumnValue::Date(Some(millis)))
    }

    pub fn bytes(v: impl Into<Vec<u8>>) -> Self {
        Self::new(ColumnValue::Bytes(Some(v.into())))
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn value(&self) -> &ColumnValue {
        &self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Replace the raw value, retagging the column and recomputing its size.
    pub fn set_value(&mut self, value: ColumnValue) {
        self.column_type = value.column_type();
        self.byte_size = value.byte_size();
        self.value = value;
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            ColumnValue::Long(v) | ColumnValue::Date(v) => v,
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            ColumnValue::Double(v) => v,
            ColumnValue::Long(v) => v.map(|n| n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ColumnValue::String(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            ColumnValue::Bool(v) => v,
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            ColumnValue::Bytes(v) => v.as_deref(),
            ColumnValue::String(v) => v.as_deref().map(str::as_bytes),
            _ => None,
        }
    }
}

impl From<i64> for Column {
    fn from(v: i64) -> Self {
        Column::long(v)
    }
}

impl From<f64> for Column {
    fn from(v: f64) -> Self {
        Column::double(v)
    }
}

impl From<bool> for Column {
    fn from(v: bool) -> Self {
        Column::bool(v)
    }
}

impl From<&str> for Column {
    fn from(v: &str) -> Self {
        Column::string(v)
    }
}

impl From<String> for Column {
    fn from(v: String) -> Self {
        Column::string(v)
    }
}

//! Engine-neutral SQL values and rows.
//!
//! Both engines funnel through these five storage classes. Server column
//! types (VARCHAR, DATETIME, DECIMAL, ...) are decoded into the closest class
//! on read; timestamps travel as `"%Y-%m-%d %H:%M:%S"` text, which both
//! engines accept back on write.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single bound parameter or result cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum SqlValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// One result row, addressable by column name.
///
/// Columns keep query order; lookups are linear, which is fine for the row
/// widths involved here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn from_pairs(pairs: Vec<(String, SqlValue)>) -> Self {
        let (columns, values) = pairs.into_iter().unzip();
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    pub fn get_text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(SqlValue::as_str)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_by_name() {
        let row = SqlRow::from_pairs(vec![
            ("id".to_string(), SqlValue::Integer(42)),
            ("title".to_string(), SqlValue::Text("printer down".to_string())),
            ("closed_at".to_string(), SqlValue::Null),
        ]);

        assert_eq!(row.get_i64("id"), Some(42));
        assert_eq!(row.get_text("title"), Some("printer down"));
        assert!(row.get("closed_at").is_some_and(SqlValue::is_null));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<i64> = None;
        assert_eq!(SqlValue::from(none), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(7i64)), SqlValue::Integer(7));
    }
}

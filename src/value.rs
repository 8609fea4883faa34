//! Scalar values and result rows shared by both database backends.
//!
//! Logical queries bind [`Value`] parameters and produce [`Row`]s regardless
//! of whether they ran against MySQL or SQLite. Decoding goes through the
//! driver's reported column type, so a row pulled from one backend can be
//! re-bound as parameters against the other (the sync and replication paths
//! depend on this round trip).

use sqlx::mysql::{MySql, MySqlArguments, MySqlRow};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use crate::error::{EngineError, Result};

/// A scalar cell value, the common denominator of both backends.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Integer view, if this value is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Text view, if this value is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// A decoded result row.
///
/// Column order is preserved from the statement, which matters when a row is
/// turned back into an INSERT column list.
#[derive(Debug, Clone, Default)]
pub struct Row {
    pairs: Vec<(String, Value)>,
}

impl Row {
    pub fn new(pairs: Vec<(String, Value)>) -> Self {
        Self { pairs }
    }

    /// Look up a cell by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.pairs.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Column names in statement order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(c, _)| c.as_str())
    }

    /// Cell values in statement order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.pairs.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Bind parameters onto a MySQL query.
pub(crate) fn bind_mysql<'q>(
    mut q: Query<'q, MySql, MySqlArguments>,
    params: &[Value],
) -> Query<'q, MySql, MySqlArguments> {
    for p in params {
        q = match p {
            Value::Null => q.bind(Option::<String>::None),
            Value::Bool(b) => q.bind(*b),
            Value::Int(i) => q.bind(*i),
            Value::Real(f) => q.bind(*f),
            Value::Text(s) => q.bind(s.clone()),
            Value::Bytes(b) => q.bind(b.clone()),
        };
    }
    q
}

/// Bind parameters onto a SQLite query.
pub(crate) fn bind_sqlite<'q>(
    mut q: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for p in params {
        q = match p {
            Value::Null => q.bind(Option::<String>::None),
            Value::Bool(b) => q.bind(*b),
            Value::Int(i) => q.bind(*i),
            Value::Real(f) => q.bind(*f),
            Value::Text(s) => q.bind(s.clone()),
            Value::Bytes(b) => q.bind(b.clone()),
        };
    }
    q
}

/// Decode a MySQL row into the backend-neutral form.
///
/// Temporal columns are rendered as `YYYY-MM-DD HH:MM:SS` text so they can
/// be re-inserted into SQLite unchanged (SQLite stores them as text anyway).
pub(crate) fn decode_mysql_row(row: &MySqlRow) -> Result<Row> {
    let mut pairs = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i).map_err(|e| EngineError::db("decode", e))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let ty = raw.type_info().name().to_string();
            decode_mysql_cell(row, i, &ty)?
        };
        pairs.push((col.name().to_string(), value));
    }
    Ok(Row::new(pairs))
}

fn decode_mysql_cell(row: &MySqlRow, i: usize, ty: &str) -> Result<Value> {
    let err = |e: sqlx::Error| EngineError::db("decode", e);
    let v = match ty {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(i).map_err(err)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::Int(row.try_get::<i64, _>(i).map_err(err)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => {
            Value::Int(row.try_get_unchecked::<u64, _>(i).map_err(err)? as i64)
        }
        "FLOAT" => Value::Real(row.try_get::<f32, _>(i).map_err(err)? as f64),
        "DOUBLE" => Value::Real(row.try_get::<f64, _>(i).map_err(err)?),
        "DATETIME" | "TIMESTAMP" => {
            let dt = row
                .try_get_unchecked::<chrono::NaiveDateTime, _>(i)
                .map_err(err)?;
            Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        "DATE" => {
            let d = row
                .try_get_unchecked::<chrono::NaiveDate, _>(i)
                .map_err(err)?;
            Value::Text(d.format("%Y-%m-%d").to_string())
        }
        "TIME" => {
            let t = row
                .try_get_unchecked::<chrono::NaiveTime, _>(i)
                .map_err(err)?;
            Value::Text(t.format("%H:%M:%S").to_string())
        }
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
            Value::Bytes(row.try_get::<Vec<u8>, _>(i).map_err(err)?)
        }
        // VARCHAR/TEXT/CHAR/ENUM/DECIMAL/JSON and anything exotic.
        _ => Value::Text(row.try_get_unchecked::<String, _>(i).map_err(err)?),
    };
    Ok(v)
}

/// Decode a SQLite row into the backend-neutral form.
pub(crate) fn decode_sqlite_row(row: &SqliteRow) -> Result<Row> {
    let err = |e: sqlx::Error| EngineError::db("decode", e);
    let mut pairs = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i).map_err(err)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(i).map_err(err)?),
                "INTEGER" => Value::Int(row.try_get::<i64, _>(i).map_err(err)?),
                "REAL" | "NUMERIC" => {
                    Value::Real(row.try_get_unchecked::<f64, _>(i).map_err(err)?)
                }
                "BLOB" => Value::Bytes(row.try_get::<Vec<u8>, _>(i).map_err(err)?),
                // TEXT plus declared affinities like DATETIME.
                _ => Value::Text(row.try_get_unchecked::<String, _>(i).map_err(err)?),
            }
        };
        pairs.push((col.name().to_string(), value));
    }
    Ok(Row::new(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new(vec![
            ("id".to_string(), Value::Int(7)),
            ("title".to_string(), Value::Text("Printer on fire".to_string())),
            ("closed".to_string(), Value::Bool(false)),
            ("notes".to_string(), Value::Null),
        ])
    }

    #[test]
    fn test_row_get_preserves_order() {
        let row = sample_row();
        let cols: Vec<&str> = row.columns().collect();
        assert_eq!(cols, vec!["id", "title", "closed", "notes"]);
        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_value_views() {
        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Text("x".to_string()).as_str(), Some("x"));
        assert_eq!(Value::Text("x".to_string()).as_i64(), None);
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_value_from_conversions() {
        assert_eq!(Value::from(3i64), Value::Int(3));
        assert_eq!(Value::from("abc"), Value::Text("abc".to_string()));
    }

    #[test]
    fn test_row_len() {
        let row = sample_row();
        assert_eq!(row.len(), 4);
        assert!(!row.is_empty());
        assert!(Row::default().is_empty());
    }
}

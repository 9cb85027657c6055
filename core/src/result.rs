//! Tabular query results.

use chrono::{DateTime, FixedOffset};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Header of the time-bucket column.
pub const DATETIME_ALIAS: &str = "datetime";
/// Sole header of a result that carries a failure message.
pub const ERROR_ALIAS: &str = "error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Timestamp(DateTime<FixedOffset>),
    Text(String),
}

impl Cell {
    /// Numeric view used by merges. Missing and non-numeric values count as 0.
    pub fn as_f64(&self) -> f64 {
        match self {
            Cell::Int(i) => *i as f64,
            Cell::Float(f) => *f,
            Cell::Text(s) => s.trim().parse().unwrap_or(0.0),
            Cell::Null | Cell::Timestamp(_) => 0.0,
        }
    }

    /// Identity of this cell inside a merge key. Timestamps key on their
    /// wall-clock reading so buckets from different zones line up by day.
    pub fn key_string(&self) -> String {
        match self {
            Cell::Null => "$none".to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Timestamp(dt) => format!("dat${}", dt.naive_local().format("%Y-%m-%dT%H:%M:%S")),
            Cell::Text(s) => s.clone(),
        }
    }

    pub fn to_sql_value(&self) -> SqlValue {
        match self {
            Cell::Null => SqlValue::Null,
            Cell::Int(i) => SqlValue::Integer(*i),
            Cell::Float(f) => SqlValue::Real(*f),
            Cell::Timestamp(dt) => SqlValue::Text(dt.to_rfc3339()),
            Cell::Text(s) => SqlValue::Text(s.clone()),
        }
    }

    /// Total order across cell kinds: nulls, numbers, timestamps, text.
    pub fn compare(&self, other: &Cell) -> Ordering {
        fn rank(c: &Cell) -> u8 {
            match c {
                Cell::Null => 0,
                Cell::Int(_) | Cell::Float(_) => 1,
                Cell::Timestamp(_) => 2,
                Cell::Text(_) => 3,
            }
        }
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => a.cmp(b),
            (a @ (Cell::Int(_) | Cell::Float(_)), b @ (Cell::Int(_) | Cell::Float(_))) => {
                a.as_f64().total_cmp(&b.as_f64())
            }
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl From<ValueRef<'_>> for Cell {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(i) => Cell::Int(i),
            ValueRef::Real(f) => Cell::Float(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Cell::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }
}

/// Ordered headers plus rows of the same width.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl QueryResult {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { headers, rows }
    }

    /// Zero-row result that still names its columns.
    pub fn with_headers(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Failure marker. The message is user-facing and never carries SQL.
    pub fn error(message: &str) -> Self {
        Self {
            headers: vec![ERROR_ALIAS.to_string()],
            rows: vec![vec![Cell::Text(format!("Query failed: - {message}"))]],
        }
    }

    pub fn is_error(&self) -> bool {
        self.headers.first().map(String::as_str) == Some(ERROR_ALIAS)
    }

    /// Structurally empty: no headers and no rows.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }

    pub fn is_well_formed(&self) -> bool {
        self.rows.iter().all(|r| r.len() == self.headers.len())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Same header set, ignoring order.
    pub fn headers_match(&self, other: &QueryResult) -> bool {
        let mut a: Vec<&str> = self.headers.iter().map(String::as_str).collect();
        let mut b: Vec<&str> = other.headers.iter().map(String::as_str).collect();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }

    pub fn is_time_bucketed(&self) -> bool {
        self.headers.first().map(String::as_str) == Some(DATETIME_ALIAS)
    }
}

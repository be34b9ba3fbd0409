use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const AFFECTED_ROWS_COLUMN: &str = "affected_rows";

static NULL: CellValue = CellValue::Null;

/// A single cell, independent of which driver produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl CellValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Parses a command-line binding: integers, floats, `true`/`false` and
    /// `null` keep their type, everything else binds as text.
    #[must_use]
    pub fn parse_binding(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if let Ok(value) = raw.parse::<bool>() {
            return Self::Bool(value);
        }
        if let Ok(value) = raw.parse::<i64>() {
            return Self::Int(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            if value.is_finite() {
                return Self::Float(value);
            }
        }
        Self::Text(raw.to_string())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::UInt(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for CellValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Positional output of a read statement as a driver hands it back.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

pub type QueryRow = BTreeMap<String, CellValue>;

/// Normalized statement output. `columns` fixes display order; each row is
/// keyed by column name.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

impl QueryResult {
    #[must_use]
    pub fn from_row_set(row_set: RowSet) -> Self {
        let RowSet { columns, rows } = row_set;
        let rows = rows
            .into_iter()
            .map(|values| {
                let mut values = values.into_iter();
                columns
                    .iter()
                    .map(|column| (column.clone(), values.next().unwrap_or(CellValue::Null)))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    #[must_use]
    pub fn affected_rows(count: u64) -> Self {
        let column = AFFECTED_ROWS_COLUMN.to_string();
        let row = QueryRow::from([(column.clone(), CellValue::UInt(count))]);
        Self {
            columns: vec![column],
            rows: vec![row],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Values of one row in column order, with `Null` for missing keys.
    pub fn ordered_values<'a>(&'a self, row: &'a QueryRow) -> impl Iterator<Item = &'a CellValue> {
        self.columns
            .iter()
            .map(move |column| row.get(column).unwrap_or(&NULL))
    }
}

use std::fmt;
use std::str::FromStr;

use otterstax_core::results::{CellValue, QueryResult};
use serde_json::{Map, Value};
use thiserror::Error;

pub const EMPTY_TABLE: &str = "No results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl OutputFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown output format `{0}` (expected table, json or csv)")]
pub struct UnknownFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(UnknownFormat(raw.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to serialize JSON output: {0}")]
pub struct RenderError(#[from] serde_json::Error);

pub fn render(result: &QueryResult, format: OutputFormat) -> Result<String, RenderError> {
    match format {
        OutputFormat::Table => Ok(render_table(result)),
        OutputFormat::Json => render_json(result),
        OutputFormat::Csv => Ok(render_csv(result)),
    }
}

/// Pipe-separated columns padded to the widest value, or `No results`.
#[must_use]
pub fn render_table(result: &QueryResult) -> String {
    if result.is_empty() {
        return EMPTY_TABLE.to_string();
    }

    let cells = result
        .rows
        .iter()
        .map(|row| {
            result
                .ordered_values(row)
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut widths = result
        .columns
        .iter()
        .map(|column| column.chars().count())
        .collect::<Vec<_>>();
    for row in &cells {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.chars().count());
        }
    }

    let mut lines = Vec::with_capacity(cells.len() + 2);
    lines.push(join_padded(result.columns.iter().map(String::as_str), &widths));
    lines.push(
        widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in &cells {
        lines.push(join_padded(row.iter().map(String::as_str), &widths));
    }
    lines.join("\n")
}

fn join_padded<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    values
        .zip(widths)
        .map(|(value, width)| format!("{value:<width$}"))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Pretty-printed array of row objects; numbers and nulls keep their JSON type.
pub fn render_json(result: &QueryResult) -> Result<String, RenderError> {
    let records = result
        .rows
        .iter()
        .map(|row| {
            let mut object = Map::with_capacity(result.columns.len());
            for (column, value) in result.columns.iter().zip(result.ordered_values(row)) {
                object.insert(column.clone(), cell_to_json(value));
            }
            Value::Object(object)
        })
        .collect::<Vec<_>>();

    Ok(serde_json::to_string_pretty(&records)?)
}

fn cell_to_json(value: &CellValue) -> Value {
    match value {
        CellValue::Null => Value::Null,
        CellValue::Bool(value) => Value::Bool(*value),
        CellValue::Int(value) => Value::from(*value),
        CellValue::UInt(value) => Value::from(*value),
        CellValue::Float(value) => Value::from(*value),
        CellValue::Text(value) => Value::String(value.clone()),
    }
}

/// Header line plus one line per row. Nulls become empty fields; a result
/// without columns renders as nothing.
#[must_use]
pub fn render_csv(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(result.len() + 1);
    lines.push(
        result
            .columns
            .iter()
            .map(|column| csv_escape(column))
            .collect::<Vec<_>>()
            .join(","),
    );
    for row in &result.rows {
        lines.push(
            result
                .ordered_values(row)
                .map(|value| match value {
                    CellValue::Null => String::new(),
                    other => csv_escape(&other.to_string()),
                })
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use otterstax_core::results::{CellValue, QueryResult, RowSet};

    use super::{render, render_csv, render_json, render_table, OutputFormat, EMPTY_TABLE};

    fn sample() -> QueryResult {
        QueryResult::from_row_set(RowSet {
            columns: vec!["id".to_string(), "name".to_string(), "note".to_string()],
            rows: vec![
                vec![CellValue::Int(1), CellValue::from("alpha"), CellValue::Null],
                vec![
                    CellValue::Int(22),
                    CellValue::from("quote \"b\", c"),
                    CellValue::from("ok"),
                ],
            ],
        })
    }

    #[test]
    fn table_pads_columns_to_widest_value() {
        let output = render_table(&sample());
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "id | name         | note");
        assert_eq!(lines[1], "---+--------------+-----");
        assert_eq!(lines[2], "1  | alpha        | NULL");
        assert_eq!(lines[3], "22 | quote \"b\", c | ok  ");
    }

    #[test]
    fn empty_result_renders_placeholder_table() {
        let empty = QueryResult {
            columns: vec!["id".to_string()],
            rows: Vec::new(),
        };
        assert_eq!(render_table(&empty), EMPTY_TABLE);
        assert_eq!(render_json(&empty).expect("json"), "[]");
        assert_eq!(render_csv(&empty), "id");
    }

    #[test]
    fn json_keeps_value_types_and_column_keys() {
        let output = render_json(&sample()).expect("json");
        let parsed: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        assert_eq!(parsed[0]["id"], 1);
        assert_eq!(parsed[0]["name"], "alpha");
        assert!(parsed[0]["note"].is_null());
        assert_eq!(parsed[1]["id"], 22);
    }

    #[test]
    fn csv_escapes_and_blanks_nulls() {
        let output = render_csv(&sample());
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "id,name,note");
        assert_eq!(lines[1], "1,alpha,");
        assert_eq!(lines[2], "22,\"quote \"\"b\"\", c\",ok");
    }

    #[test]
    fn affected_rows_render_in_every_format() {
        let result = QueryResult::affected_rows(3);
        assert!(render(&result, OutputFormat::Table)
            .expect("table")
            .ends_with("3            "));
        assert_eq!(render(&result, OutputFormat::Csv).expect("csv"), "affected_rows\n3");
        assert!(render(&result, OutputFormat::Json)
            .expect("json")
            .contains("\"affected_rows\": 3"));
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!(" csv ".parse::<OutputFormat>(), Ok(OutputFormat::Csv));
        assert_eq!("table".parse::<OutputFormat>(), Ok(OutputFormat::Table));
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default().to_string(), "table");
    }
}

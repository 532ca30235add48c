//! Tabular query results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Column names plus rows of JSON scalars (null, number, string)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    /// A single value, when the result is one row by one column
    pub fn scalar(&self) -> Option<&Value> {
        match (self.columns.len(), self.rows.as_slice()) {
            (1, [row]) => row.first(),
            _ => None,
        }
    }

    /// Render as a markdown grid, showing at most `max_rows` rows
    pub fn to_markdown(&self, max_rows: usize) -> String {
        let mut table = self.grid(max_rows);
        table.with(Style::markdown());
        self.with_footer(table.to_string(), max_rows)
    }

    /// Boxed rendering for terminals
    pub fn to_terminal(&self, max_rows: usize) -> String {
        let mut table = self.grid(max_rows);
        table.with(Style::rounded());
        self.with_footer(table.to_string(), max_rows)
    }

    fn grid(&self, max_rows: usize) -> tabled::Table {
        let mut builder = Builder::default();
        builder.push_record(self.columns.iter().cloned());
        for row in self.rows.iter().take(max_rows) {
            builder.push_record(row.iter().map(display_value));
        }
        builder.build()
    }

    fn with_footer(&self, mut out: String, max_rows: usize) -> String {
        if self.rows.len() > max_rows {
            out.push_str(&format!(
                "\n... {} more rows not shown",
                self.rows.len() - max_rows
            ));
        }
        out
    }
}

/// Human-facing rendering of a cell
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NaN".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format_float(f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        let s = format!("{:.6}", f);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

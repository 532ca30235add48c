//! Dataset engine: uploaded CSV files queried through embedded SQLite

pub mod chart;
mod dataset;
mod table;

pub use chart::{render_svg, Chart, ChartKind, ChartSpec};
pub use dataset::{ColumnInfo, Dataset, DatasetSummary, Dtype, QueryCancel, QueryResult, TABLE_NAME};
pub use table::{display_value, Table};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("Could not parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Dataset is empty: {0}")]
    Empty(String),

    #[error("Only read-only queries (SELECT / WITH) are allowed")]
    ReadOnly,

    #[error("Query was cancelled before it finished")]
    Cancelled,

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Cannot draw chart: {0}")]
    Chart(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

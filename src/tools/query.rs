//! `run_dataframe_query`: read-only SQL over the uploaded dataset

use super::{required_str, Artifact, Tool, ToolResult};
use crate::data::{display_value, Dataset, QueryCancel, QueryResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct RunDataframeQueryTool {
    dataset: Arc<Dataset>,
    observation_rows: usize,
    artifact_rows: usize,
}

impl RunDataframeQueryTool {
    pub fn new(dataset: Arc<Dataset>, observation_rows: usize, artifact_rows: usize) -> Self {
        Self {
            dataset,
            observation_rows,
            artifact_rows: artifact_rows.max(observation_rows),
        }
    }
}

/// Run a query off the async runtime
///
/// Dropping the returned future (a tool timeout, for one) cancels the query
/// on the blocking thread, so it cannot keep the dataset locked.
pub(crate) async fn run_query(dataset: &Arc<Dataset>, sql: &str, limit: usize) -> Result<QueryResult> {
    let cancel = QueryCancel::default();
    let _guard = CancelOnDrop(cancel.clone());
    let dataset = Arc::clone(dataset);
    let sql = sql.to_string();
    let result = tokio::task::spawn_blocking(move || dataset.query_cancellable(&sql, limit, &cancel))
        .await
        .context("query task failed")??;
    Ok(result)
}

struct CancelOnDrop(QueryCancel);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[async_trait]
impl Tool for RunDataframeQueryTool {
    fn name(&self) -> &str {
        "run_dataframe_query"
    }

    fn description(&self) -> &str {
        "Run a read-only SQLite query against the uploaded dataset, stored in the table `df`. \
         Use it for anything that needs the data: previews, filters, counts, aggregates, \
         group-bys, statistics. The result table is shown to the user."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SQLite SELECT (or WITH ... SELECT) statement over the table df, e.g. SELECT * FROM df LIMIT 5"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolResult> {
        let sql = required_str(&params, "query")?;
        tracing::info!(dataset = self.dataset.name(), sql = sql, "Running dataframe query");

        let QueryResult { table, truncated } =
            run_query(&self.dataset, sql, self.artifact_rows).await?;

        let output = if let Some(value) = table.scalar() {
            format!("Result: {}", display_value(value))
        } else if table.columns.is_empty() {
            "The query returned no columns.".to_string()
        } else if table.is_empty() {
            format!(
                "The query returned no rows. Columns: {}",
                table.columns.join(", ")
            )
        } else {
            let mut out = format!(
                "Query returned {}{} rows x {} columns:\n",
                table.len(),
                if truncated { "+" } else { "" },
                table.columns.len()
            );
            out.push_str(&table.to_markdown(self.observation_rows));
            out
        };

        Ok(ToolResult::success(output).with_artifact(Artifact::Table { table, truncated }))
    }
}

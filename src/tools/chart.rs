//! `plot_chart`: query the dataset and draw the result

use super::{query::run_query, required_str, Artifact, Tool, ToolResult};
use crate::data::{render_svg, ChartKind, ChartSpec, Dataset};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const MAX_CHART_ROWS: usize = 2000;

pub struct PlotChartTool {
    dataset: Arc<Dataset>,
}

impl PlotChartTool {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self { dataset }
    }
}

#[async_trait]
impl Tool for PlotChartTool {
    fn name(&self) -> &str {
        "plot_chart"
    }

    fn description(&self) -> &str {
        "Draw a chart from the uploaded dataset. Provide a SQLite query over the table `df` \
         whose result holds the x column and a numeric y column, and the chart kind. \
         The chart is shown to the user."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "SQLite SELECT over df producing the columns to plot, e.g. SELECT Species, AVG(PetalWidthCm) AS mean_width FROM df GROUP BY Species"
                },
                "kind": {
                    "type": "string",
                    "enum": ["bar", "line", "scatter"],
                    "description": "bar for categories, line for ordered series, scatter for two numeric columns"
                },
                "x": {
                    "type": "string",
                    "description": "Result column for the x axis"
                },
                "y": {
                    "type": "string",
                    "description": "Numeric result column for the y axis"
                },
                "title": {
                    "type": "string",
                    "description": "Chart title"
                }
            },
            "required": ["query", "kind", "x", "y"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolResult> {
        let sql = required_str(&params, "query")?;
        let spec = ChartSpec {
            kind: serde_json::from_value::<ChartKind>(json!(required_str(&params, "kind")?
                .to_lowercase()))
            .context("kind must be one of bar, line, scatter")?,
            x: required_str(&params, "x")?.to_string(),
            y: required_str(&params, "y")?.to_string(),
            title: params
                .get("title")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };
        tracing::info!(
            dataset = self.dataset.name(),
            kind = ?spec.kind,
            sql = sql,
            "Plotting chart"
        );

        let result = run_query(&self.dataset, sql, MAX_CHART_ROWS).await?;
        let chart = render_svg(&spec, &result.table)?;

        let mut output = format!(
            "Rendered a {} chart titled '{}' from {} rows; it is displayed to the user.",
            spec.kind.as_str(),
            chart.title,
            result.table.len()
        );
        if result.truncated {
            output.push_str(&format!(" Only the first {} rows were plotted.", MAX_CHART_ROWS));
        }

        Ok(ToolResult::success(output).with_artifact(Artifact::Image { chart }))
    }
}

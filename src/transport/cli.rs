//! One-shot question from the terminal

use crate::agent::{AgentSettings, Answer, DataAgent};
use crate::config::Config;
use crate::data::Dataset;
use crate::llm::{self, LlmProvider};
use crate::telemetry::Tracer;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Rows printed for a table answer
const TERMINAL_ROWS: usize = 50;
const TRACE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub struct AskOptions {
    pub file: PathBuf,
    pub question: String,
    pub out: Option<PathBuf>,
    pub format: OutputFormat,
}

/// Load a CSV, ask one question and print the answer
pub async fn run_ask(config: Config, options: AskOptions) -> Result<()> {
    let dataset = load_dataset(&options.file)?;
    tracing::info!(
        dataset = dataset.name(),
        rows = dataset.row_count(),
        "Dataset loaded"
    );

    let provider: Arc<dyn LlmProvider> =
        Arc::new(llm::create_provider(&config.google_api_key, &config.llm)?);
    let tracer = Tracer::from_config(config.tracing.as_ref())?;

    let mut agent = DataAgent::new(provider, dataset, AgentSettings::from(&config.agent))
        .with_tracer(tracer.clone());
    let answer = agent.ask(&options.question).await;
    tracer.flush(TRACE_FLUSH_TIMEOUT).await;

    if let (Some(out), Answer::Image { chart, .. }) = (&options.out, &answer) {
        std::fs::write(out, &chart.svg)
            .with_context(|| format!("Failed to write chart to {}", out.display()))?;
        tracing::info!(path = %out.display(), "Chart written");
    }

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
        OutputFormat::Text => println!("{}", render_answer(&answer, options.out.as_deref())),
    }

    if answer.is_error() {
        bail!("The question could not be answered");
    }
    Ok(())
}

fn load_dataset(path: &Path) -> Result<Arc<Dataset>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let dataset = Dataset::from_csv_bytes(name, &bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Arc::new(dataset))
}

/// Plain-text rendering of an answer
pub fn render_answer(answer: &Answer, chart_path: Option<&Path>) -> String {
    match answer {
        Answer::Text { text, .. } => text.clone(),
        Answer::Table {
            text,
            table,
            truncated,
        } => {
            let mut out = format!("{}\n\n{}", text, table.to_terminal(TERMINAL_ROWS));
            if *truncated {
                out.push_str("\n(result truncated)");
            }
            out
        }
        Answer::Image { text, chart } => match chart_path {
            Some(path) => format!("{}\n\nChart '{}' saved to {}", text, chart.title, path.display()),
            None => format!(
                "{}\n\nChart '{}' rendered; pass --out chart.svg to save it",
                text, chart.title
            ),
        },
    }
}

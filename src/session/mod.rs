//! Per-browser conversation state
//!
//! Handles:
//! - Session creation, lookup and removal
//! - Dataset upload and replacement (rebuilds the agent, clears history)
//! - Ordered question/answer history
//! - Reaping sessions that went idle

mod store;

pub use store::{SessionStore, SharedSession};

use crate::agent::{AgentSettings, Answer, DataAgent};
use crate::data::{DataError, Dataset, DatasetSummary, Table};
use crate::llm::LlmProvider;
use crate::telemetry::Tracer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("No dataset loaded. Upload a CSV file first.")]
    NoDataset,

    #[error("Session is busy answering another question")]
    Busy,

    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Dataset load failed: {0}")]
    Load(String),
}

/// One question and its answer
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub index: usize,
    pub question: String,
    pub answer: Answer,
    pub asked_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// What the UI shows about the loaded dataset
#[derive(Debug, Clone, Serialize)]
pub struct DatasetView {
    #[serde(flatten)]
    pub summary: DatasetSummary,
    pub preview: Table,
}

/// Everything shared by the sessions of one server
#[derive(Clone)]
pub struct SessionDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub settings: AgentSettings,
    pub tracer: Tracer,
    pub preview_rows: usize,
}

pub struct Session {
    id: Uuid,
    last_active: Instant,
    deps: SessionDeps,
    agent: Option<DataAgent>,
    turns: Vec<Turn>,
}

impl Session {
    pub fn new(id: Uuid, deps: SessionDeps) -> Self {
        Self {
            id,
            last_active: Instant::now(),
            deps,
            agent: None,
            turns: Vec::new(),
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn dataset(&self) -> Option<&Arc<Dataset>> {
        self.agent.as_ref().map(DataAgent::dataset)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Parse an uploaded CSV and make it the session's dataset
    ///
    /// Replaces any previous dataset and starts a fresh conversation. On a
    /// parse failure the previous dataset and history stay as they were.
    pub async fn load_dataset(&mut self, name: &str, bytes: Vec<u8>) -> Result<DatasetView, SessionError> {
        self.touch();
        let owned_name = name.to_string();
        let dataset = tokio::task::spawn_blocking(move || Dataset::from_csv_bytes(owned_name, &bytes))
            .await
            .map_err(|e| SessionError::Load(e.to_string()))??;
        let dataset = Arc::new(dataset);

        let agent = DataAgent::new(
            Arc::clone(&self.deps.provider),
            Arc::clone(&dataset),
            self.deps.settings.clone(),
        )
        .with_tracer(self.deps.tracer.clone())
        .with_session_id(self.id.to_string());

        self.agent = Some(agent);
        self.turns.clear();

        tracing::info!(
            session = %self.id,
            dataset = dataset.name(),
            rows = dataset.row_count(),
            columns = dataset.columns().len(),
            "Dataset loaded"
        );

        self.dataset_view()
    }

    /// Summary and preview of the current dataset
    pub fn dataset_view(&self) -> Result<DatasetView, SessionError> {
        let dataset = self.dataset().ok_or(SessionError::NoDataset)?;
        Ok(DatasetView {
            summary: dataset.summary(),
            preview: dataset.preview(self.deps.preview_rows)?,
        })
    }

    /// Drop the dataset and the conversation about it
    pub fn clear_dataset(&mut self) {
        self.touch();
        if self.agent.take().is_some() {
            tracing::info!(session = %self.id, "Dataset cleared");
        }
        self.turns.clear();
    }

    /// Ask the agent a question about the loaded dataset
    pub async fn ask(&mut self, question: &str) -> Result<&Turn, SessionError> {
        self.touch();
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }
        let agent = self.agent.as_mut().ok_or(SessionError::NoDataset)?;

        let asked_at = Utc::now();
        let start = Instant::now();
        let answer = agent.ask(question).await;

        let index = self.turns.len();
        self.turns.push(Turn {
            index,
            question: question.to_string(),
            answer,
            asked_at,
            latency_ms: start.elapsed().as_millis() as u64,
        });
        self.touch();

        Ok(&self.turns[index])
    }
}

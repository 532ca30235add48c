//! Optional tracing of agent invocations to a Langfuse backend
//!
//! Delivery happens off the request path. When tracing is disabled nothing
//! is sent anywhere; when the backend fails the error is logged and dropped.

mod langfuse;

pub use langfuse::{ingestion_batch, LangfuseClient, TelemetryError};

use crate::config::TracingConfig;
use crate::llm::TokenUsage;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// One agent invocation: inputs, outputs, latency
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub id: uuid::Uuid,
    pub session_id: Option<String>,
    pub name: String,
    pub model: String,
    pub input: Value,
    pub output: Value,
    pub metadata: Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
}

/// Client plus the deliveries still in flight
pub struct LangfuseSink {
    client: LangfuseClient,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone, Default)]
pub enum Tracer {
    #[default]
    Disabled,
    Langfuse(Arc<LangfuseSink>),
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tracer::Disabled => f.write_str("Tracer::Disabled"),
            Tracer::Langfuse(sink) => write!(f, "Tracer::Langfuse({})", sink.client.endpoint()),
        }
    }
}

impl Tracer {
    pub fn from_config(config: Option<&TracingConfig>) -> Result<Self, TelemetryError> {
        match config {
            None => {
                tracing::info!("Langfuse tracing disabled");
                Ok(Tracer::Disabled)
            }
            Some(config) => {
                let client = LangfuseClient::new(config)?;
                tracing::info!(endpoint = client.endpoint(), "Langfuse tracing enabled");
                Ok(Tracer::Langfuse(Arc::new(LangfuseSink {
                    client,
                    pending: Mutex::new(Vec::new()),
                })))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Tracer::Langfuse(_))
    }

    /// Hand a record to the backend without waiting for delivery
    pub fn record(&self, record: TraceRecord) {
        let Tracer::Langfuse(sink) = self else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(trace_id = %record.id, "No async runtime, dropping trace");
            return;
        };

        let task_sink = Arc::clone(sink);
        let task = handle.spawn(async move {
            match task_sink.client.send(&record).await {
                Ok(()) => tracing::debug!(trace_id = %record.id, "Trace delivered"),
                Err(e) => tracing::warn!(trace_id = %record.id, error = %e, "Trace delivery failed"),
            }
        });

        if let Ok(mut pending) = sink.pending.lock() {
            pending.retain(|t| !t.is_finished());
            pending.push(task);
        }
    }

    /// Wait for in-flight deliveries, giving up after `timeout`
    ///
    /// Short-lived processes call this before exiting so their trace is not
    /// lost with the runtime.
    pub async fn flush(&self, timeout: Duration) {
        let Tracer::Langfuse(sink) = self else {
            return;
        };
        let tasks: Vec<JoinHandle<()>> = match sink.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        if tasks.is_empty() {
            return;
        }
        if tokio::time::timeout(timeout, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for trace delivery");
        }
    }
}

//! Langfuse ingestion client
//!
//! Each agent invocation becomes one batch with a `trace-create` event and a
//! `generation-create` event carrying model, usage and timings.

use super::TraceRecord;
use crate::config::TracingConfig;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

const INGESTION_PATH: &str = "/api/public/ingestion";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("tracing backend unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracing backend rejected batch ({status}): {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("tracing backend rejected {count} event(s): {detail}")]
    EventsRejected { count: usize, detail: String },
}

pub struct LangfuseClient {
    client: reqwest::Client,
    endpoint: String,
    public_key: String,
    secret_key: String,
}

impl LangfuseClient {
    pub fn new(config: &TracingConfig) -> Result<Self, TelemetryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", config.host, INGESTION_PATH),
            public_key: config.public_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver one trace record
    pub async fn send(&self, record: &TraceRecord) -> Result<(), TelemetryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&ingestion_batch(record))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TelemetryError::Rejected { status, body });
        }
        // 207 Multi-Status lists per-event failures in `errors`
        match rejected_events(&body) {
            Some((count, detail)) => Err(TelemetryError::EventsRejected { count, detail }),
            None => Ok(()),
        }
    }
}

/// Count and first message of the failed events in an ingestion response
fn rejected_events(body: &str) -> Option<(usize, String)> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let errors = parsed.get("errors")?.as_array()?;
    let first = errors.first()?;
    let detail = first
        .get("message")
        .or_else(|| first.get("error"))
        .map(|m| match m {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| first.to_string());
    Some((errors.len(), detail))
}

/// Build the ingestion payload for a record
pub fn ingestion_batch(record: &TraceRecord) -> Value {
    let now = chrono::Utc::now().to_rfc3339();
    let trace_id = record.id.to_string();

    let usage = record.usage.as_ref().map(|u| {
        json!({
            "input": u.input_tokens,
            "output": u.output_tokens,
            "total": u.total_tokens,
            "unit": "TOKENS"
        })
    });

    json!({
        "batch": [
            {
                "id": uuid::Uuid::new_v4().to_string(),
                "timestamp": now,
                "type": "trace-create",
                "body": {
                    "id": trace_id,
                    "name": record.name,
                    "sessionId": record.session_id,
                    "timestamp": record.started_at.to_rfc3339(),
                    "input": record.input,
                    "output": record.output,
                    "metadata": record.metadata,
                }
            },
            {
                "id": uuid::Uuid::new_v4().to_string(),
                "timestamp": now,
                "type": "generation-create",
                "body": {
                    "id": uuid::Uuid::new_v4().to_string(),
                    "traceId": trace_id,
                    "name": format!("{}.generation", record.name),
                    "model": record.model,
                    "startTime": record.started_at.to_rfc3339(),
                    "endTime": record.ended_at.to_rfc3339(),
                    "input": record.input,
                    "output": record.output,
                    "usage": usage,
                    "level": if record.error.is_some() { "ERROR" } else { "DEFAULT" },
                    "statusMessage": record.error,
                    "metadata": { "latency_ms": record.latency_ms },
                }
            }
        ]
    })
}

//! Shared helpers for integration tests: scripted model providers and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use databot::config::{Config, FileConfig, GOOGLE_API_KEY};
use databot::data::Dataset;
use databot::llm::{
    LlmError, LlmProvider, LlmResponse, Message, MessageContent, Role, ToolCall, ToolDefinition,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const IRIS_CSV: &str = include_str!("../data/iris.csv");

pub fn iris() -> Arc<Dataset> {
    Arc::new(Dataset::from_csv_bytes("iris.csv", IRIS_CSV.as_bytes()).unwrap())
}

/// Config with only the API key set
pub fn test_config(file: FileConfig) -> Config {
    Config::from_lookup(file, |name| {
        (name == GOOGLE_API_KEY).then(|| "test-key".to_string())
    })
    .unwrap()
}

/// Replays a fixed list of responses and records what it was sent
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Result<LlmResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn chat(
        &self,
        messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::EmptyResponse("script exhausted".to_string())))
    }
}

pub fn text(t: &str) -> Result<LlmResponse, LlmError> {
    Ok(LlmResponse::Text {
        text: t.to_string(),
        usage: None,
    })
}

pub fn tool(id: &str, name: &str, arguments: Value) -> Result<LlmResponse, LlmError> {
    Ok(LlmResponse::ToolCalls {
        calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        usage: None,
    })
}

pub fn query(id: &str, sql: &str) -> Result<LlmResponse, LlmError> {
    tool(id, "run_dataframe_query", json!({ "query": sql }))
}

/// Stateless provider that answers `[dataset] question`
///
/// The dataset name is read back from the system prompt, so answers show
/// which session's agent handled the question. A question containing
/// "slow" takes half a second.
pub struct EchoProvider;

pub fn dataset_in_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::System)
        .and_then(|m| m.content.as_text())
        .and_then(|p| p.split("loaded from '").nth(1))
        .and_then(|rest| rest.split('\'').next())
        .unwrap_or("?")
        .to_string()
}

pub fn last_question(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User && matches!(m.content, MessageContent::Text(_)))
        .and_then(|m| m.content.as_text())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-model"
    }

    async fn chat(
        &self,
        messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        let question = last_question(messages);
        if question.contains("slow") {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(LlmResponse::Text {
            text: format!("[{}] {}", dataset_in_prompt(messages), question),
            usage: None,
        })
    }
}

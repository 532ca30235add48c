//! Data analysis agent: model -> tools -> model until a final answer

use super::context::ConversationContext;
use super::prompt::system_prompt;
use crate::config::AgentConfig;
use crate::data::{Chart, Dataset, Table};
use crate::llm::{LlmError, LlmProvider, LlmResponse, TokenUsage, ToolCall};
use crate::telemetry::{TraceRecord, Tracer};
use crate::tools::{Artifact, PlotChartTool, RunDataframeQueryTool, ToolRegistry};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_CONSECUTIVE_DUPLICATES: usize = 2;
const MAX_TOOL_CALLS_PER_TURN: usize = 5;

/// Limits applied to every question
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_iterations: usize,
    pub observation_rows: usize,
    pub artifact_rows: usize,
    pub tool_timeout: Duration,
    pub max_context_tokens: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations.max(1),
            observation_rows: config.observation_rows,
            artifact_rows: config.artifact_rows,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            max_context_tokens: config.max_context_tokens,
        }
    }
}

/// What the user sees for one question
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Answer {
    Text { text: String, error: bool },
    Table { text: String, table: Table, truncated: bool },
    Image { text: String, chart: Chart },
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Answer::Text { text, .. } | Answer::Table { text, .. } | Answer::Image { text, .. } => {
                text
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Answer::Text { error: true, .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Answer::Text { .. } => "text",
            Answer::Table { .. } => "table",
            Answer::Image { .. } => "image",
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Answer::Text {
            text: text.into(),
            error: true,
        }
    }

    /// Final text plus the last artifact produced during the turn
    fn with_artifact(text: String, artifact: Option<Artifact>) -> Self {
        match artifact {
            None => Answer::Text { text, error: false },
            Some(Artifact::Table { table, truncated }) => Answer::Table {
                text,
                table,
                truncated,
            },
            Some(Artifact::Image { chart }) => Answer::Image { text, chart },
        }
    }
}

/// Successful turn
struct TurnOutcome {
    answer: Answer,
    iterations: usize,
    tool_calls: usize,
}

/// Failed turn, with the progress made before the failure
struct TurnFailure {
    error: LlmError,
    iterations: usize,
    tool_calls: usize,
}

/// Agent bound to one dataset
pub struct DataAgent {
    provider: Arc<dyn LlmProvider>,
    dataset: Arc<Dataset>,
    tools: ToolRegistry,
    context: ConversationContext,
    settings: AgentSettings,
    tracer: Tracer,
    session_id: Option<String>,
}

impl DataAgent {
    pub fn new(provider: Arc<dyn LlmProvider>, dataset: Arc<Dataset>, settings: AgentSettings) -> Self {
        let mut tools = ToolRegistry::new(settings.tool_timeout);
        tools.register(Arc::new(RunDataframeQueryTool::new(
            Arc::clone(&dataset),
            settings.observation_rows,
            settings.artifact_rows,
        )));
        tools.register(Arc::new(PlotChartTool::new(Arc::clone(&dataset))));

        let context = ConversationContext::new(system_prompt(dataset.name(), &dataset.schema()))
            .with_max_context_tokens(settings.max_context_tokens);

        Self {
            provider,
            dataset,
            tools,
            context,
            settings,
            tracer: Tracer::Disabled,
            session_id: None,
        }
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// Answer one question
    ///
    /// Always yields exactly one answer. Model failures become an error
    /// answer and the conversation is restored to its state before the
    /// question, so the next question starts clean.
    pub async fn ask(&mut self, question: &str) -> Answer {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let checkpoint = self.context.checkpoint();
        let mut usage = TokenUsage::default();

        tracing::info!(
            session = self.session_id.as_deref().unwrap_or("-"),
            dataset = self.dataset.name(),
            "Agent received question"
        );

        let (answer, iterations, tool_calls, error) = match self.run_turn(question, &mut usage).await {
            Ok(outcome) => (outcome.answer, outcome.iterations, outcome.tool_calls, None),
            Err(failure) => {
                tracing::warn!(error = %failure.error, "Agent turn failed, rolling back context");
                self.context.restore(checkpoint);
                let answer = Answer::error(format!(
                    "Sorry, I couldn't answer that because the language model request failed: {}. \
                     Please try again.",
                    failure.error
                ));
                (
                    answer,
                    failure.iterations,
                    failure.tool_calls,
                    Some(failure.error.to_string()),
                )
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            kind = answer.kind(),
            error = answer.is_error(),
            iterations,
            tool_calls,
            latency_ms,
            "Agent answered"
        );

        self.tracer.record(TraceRecord {
            id: uuid::Uuid::new_v4(),
            session_id: self.session_id.clone(),
            name: "databot.ask".to_string(),
            model: self.provider.model().to_string(),
            input: json!({ "question": question }),
            output: json!({ "kind": answer.kind(), "text": answer.text() }),
            metadata: json!({
                "dataset": self.dataset.name(),
                "rows": self.dataset.row_count(),
                "iterations": iterations,
                "tool_calls": tool_calls,
            }),
            started_at,
            ended_at: chrono::Utc::now(),
            latency_ms,
            usage: (usage != TokenUsage::default()).then_some(usage),
            error,
        });

        answer
    }

    async fn run_turn(&mut self, question: &str, usage: &mut TokenUsage) -> Result<TurnOutcome, TurnFailure> {
        self.context.add_user(question);

        let tool_definitions = self.tools.definitions();
        let mut iterations = 0;
        let mut total_tool_calls = 0;
        let mut last_artifact: Option<Artifact> = None;

        // Track duplicate tool results to prevent infinite loops
        let mut last_tool_results: HashMap<String, String> = HashMap::new();
        let mut consecutive_duplicate_calls = 0;

        loop {
            if iterations >= self.settings.max_iterations {
                let text = format!(
                    "I've reached the maximum number of steps ({}) without a final answer. \
                     Try asking a narrower question.",
                    self.settings.max_iterations
                );
                self.context.add_assistant(&text);
                return Ok(TurnOutcome {
                    answer: Answer::with_artifact(text, last_artifact),
                    iterations,
                    tool_calls: total_tool_calls,
                });
            }

            tracing::debug!(
                tokens = self.context.estimate_total_tokens(),
                iteration = iterations,
                "Calling model"
            );

            let response = self
                .provider
                .chat(self.context.messages(), Some(&tool_definitions))
                .await
                .map_err(|error| TurnFailure {
                    error,
                    iterations,
                    tool_calls: total_tool_calls,
                })?;

            if let Some(u) = response.usage() {
                usage.add(u);
            }
            iterations += 1;

            let (text, calls) = match response {
                LlmResponse::Text { text, .. } => (Some(text), Vec::new()),
                LlmResponse::ToolCalls { calls, .. } => (None, calls),
                LlmResponse::Mixed {
                    text, tool_calls, ..
                } => (text, tool_calls),
            };

            if calls.is_empty() {
                let text = text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| fallback_text(last_artifact.as_ref()));
                self.context.add_assistant(&text);
                return Ok(TurnOutcome {
                    answer: Answer::with_artifact(text, last_artifact),
                    iterations,
                    tool_calls: total_tool_calls,
                });
            }

            if calls.len() > MAX_TOOL_CALLS_PER_TURN {
                tracing::warn!(
                    requested = calls.len(),
                    limit = MAX_TOOL_CALLS_PER_TURN,
                    "Model requested too many tools in one step"
                );
            }
            let limited_calls = &calls[..calls.len().min(MAX_TOOL_CALLS_PER_TURN)];
            total_tool_calls += limited_calls.len();

            self.context
                .add_assistant_tool_calls(text.as_deref(), limited_calls);

            // Every call gets a result so the history stays well formed
            for call in limited_calls {
                let result = self.execute_tool(call).await;

                let result_key = format!(
                    "{}:{}",
                    call.name,
                    serde_json::to_string(&call.arguments).unwrap_or_default()
                );
                if last_tool_results.get(&result_key) == Some(&result.output) {
                    consecutive_duplicate_calls += 1;
                    tracing::warn!(
                        tool = %call.name,
                        repeats = consecutive_duplicate_calls,
                        "Tool returned identical result"
                    );
                } else {
                    consecutive_duplicate_calls = 0;
                }
                last_tool_results.insert(result_key, result.output.clone());

                if result.artifact.is_some() {
                    last_artifact = result.artifact;
                }
                self.context.add_tool_result(&call.id, &result.output);
            }

            if consecutive_duplicate_calls >= MAX_CONSECUTIVE_DUPLICATES {
                let text = "I'm getting the same result repeatedly, so I'll stop here. \
                            Here is the last result I produced."
                    .to_string();
                self.context.add_assistant(&text);
                return Ok(TurnOutcome {
                    answer: Answer::with_artifact(text, last_artifact),
                    iterations,
                    tool_calls: total_tool_calls,
                });
            }
        }
    }

    async fn execute_tool(&self, call: &ToolCall) -> crate::tools::ToolResult {
        tracing::info!(tool = %call.name, args = %call.arguments, "Executing tool");
        let start = Instant::now();
        let result = self.tools.execute(&call.name, call.arguments.clone()).await;
        tracing::info!(
            tool = %call.name,
            success = result.success,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool finished"
        );
        if !result.success {
            tracing::debug!(tool = %call.name, output = %result.output, "Tool error observation");
        }
        result
    }
}

fn fallback_text(artifact: Option<&Artifact>) -> String {
    match artifact {
        Some(Artifact::Table { .. }) => "Here is the result of the query.".to_string(),
        Some(Artifact::Image { .. }) => "Here is the chart.".to_string(),
        None => "I don't have an answer to that.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, ToolDefinition};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted(Mutex<VecDeque<Result<LlmResponse, LlmError>>>);

    impl Scripted {
        fn new(steps: Vec<Result<LlmResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(steps.into())))
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
        ) -> Result<LlmResponse, LlmError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse("script exhausted".into())))
        }
    }

    fn text(t: &str) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse::Text {
            text: t.to_string(),
            usage: None,
        })
    }

    fn query(id: &str, sql: &str) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse::ToolCalls {
            calls: vec![ToolCall {
                id: id.to_string(),
                name: "run_dataframe_query".to_string(),
                arguments: json!({ "query": sql }),
            }],
            usage: None,
        })
    }

    fn dataset() -> Arc<Dataset> {
        let csv = "name,score\nada,3\nbob,5\n";
        Arc::new(Dataset::from_csv_bytes("scores.csv", csv.as_bytes()).unwrap())
    }

    #[tokio::test]
    async fn test_direct_text_answer() {
        let mut agent = DataAgent::new(Scripted::new(vec![text("Hello!")]), dataset(), AgentSettings::default());
        let answer = agent.ask("hi").await;
        assert_eq!(
            answer,
            Answer::Text {
                text: "Hello!".to_string(),
                error: false
            }
        );
        // system, user, assistant
        assert_eq!(agent.context().len(), 3);
    }

    #[tokio::test]
    async fn test_table_answer_carries_last_artifact() {
        let provider = Scripted::new(vec![
            query("c1", "SELECT * FROM df"),
            text("Two people are listed."),
        ]);
        let mut agent = DataAgent::new(provider, dataset(), AgentSettings::default());
        match agent.ask("who is in the data?").await {
            Answer::Table { text, table, .. } => {
                assert_eq!(text, "Two people are listed.");
                assert_eq!(table.len(), 2);
            }
            other => panic!("unexpected answer: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_llm_error_rolls_back() {
        let provider = Scripted::new(vec![
            query("c1", "SELECT * FROM df"),
            Err(LlmError::RateLimited("slow down".into())),
            text("fine"),
        ]);
        let mut agent = DataAgent::new(provider, dataset(), AgentSettings::default());

        let answer = agent.ask("first").await;
        assert!(answer.is_error());
        assert_eq!(agent.context().len(), 1);

        let answer = agent.ask("second").await;
        assert!(!answer.is_error());
        assert_eq!(answer.text(), "fine");
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let provider = Scripted::new(vec![
            query("c1", "SELECT 1"),
            query("c2", "SELECT 2"),
            query("c3", "SELECT 3"),
        ]);
        let settings = AgentSettings {
            max_iterations: 2,
            ..AgentSettings::default()
        };
        let mut agent = DataAgent::new(provider, dataset(), settings);
        let answer = agent.ask("loop").await;
        assert!(answer.text().contains("maximum number of steps (2)"));
        assert_eq!(answer.kind(), "table");
    }

    #[tokio::test]
    async fn test_duplicate_calls_cut_off() {
        let provider = Scripted::new(vec![
            query("c1", "SELECT COUNT(*) FROM df"),
            query("c2", "SELECT COUNT(*) FROM df"),
            query("c3", "SELECT COUNT(*) FROM df"),
            text("never reached"),
        ]);
        let mut agent = DataAgent::new(provider, dataset(), AgentSettings::default());
        let answer = agent.ask("count").await;
        assert!(answer.text().contains("same result repeatedly"));
    }

    #[test]
    fn test_answer_serialization() {
        let answer = Answer::Text {
            text: "ok".to_string(),
            error: false,
        };
        let value = serde_json::to_value(&answer).unwrap();
        assert_eq!(value["kind"], "text");
        assert_eq!(value["error"], false);
    }
}

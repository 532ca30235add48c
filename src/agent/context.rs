//! Conversation context management

use crate::llm::{ContentPart, Message, MessageContent, Role, ToolCall};

/// Default max tokens (conservative for flash-class models)
const DEFAULT_MAX_CONTEXT_TOKENS: usize = 100_000;

/// Max tokens for a single tool observation
const MAX_TOOL_RESULT_TOKENS: usize = 8_000;

/// History captured by [`ConversationContext::checkpoint`]
#[derive(Debug, Clone)]
pub struct Checkpoint(Vec<Message>);

/// Message history for one agent: the system prompt followed by turns
#[derive(Debug, Clone)]
pub struct ConversationContext {
    messages: Vec<Message>,
    max_context_tokens: usize,
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        }
    }

    pub fn with_max_context_tokens(mut self, max: usize) -> Self {
        self.max_context_tokens = max;
        self
    }

    /// Add a user message
    pub fn add_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
        self.trim_by_tokens();
    }

    /// Add an assistant message
    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// Add an assistant message with tool calls; must precede their results
    pub fn add_assistant_tool_calls(&mut self, text: Option<&str>, tool_calls: &[ToolCall]) {
        self.messages
            .push(Message::assistant_tool_calls(text, tool_calls));
    }

    /// Add a tool result (auto-truncates if too large)
    pub fn add_tool_result(&mut self, tool_call_id: impl Into<String>, result: &str) {
        let truncated = Self::truncate_if_needed(result, MAX_TOOL_RESULT_TOKENS);
        self.messages
            .push(Message::tool_result(tool_call_id, truncated));
    }

    fn truncate_if_needed(text: &str, max_tokens: usize) -> String {
        if Self::estimate_tokens(text) <= max_tokens {
            return text.to_string();
        }

        // ~4 chars per token
        let truncated: String = text.chars().take(max_tokens * 4).collect();
        format!(
            "{}\n\n... [TRUNCATED: result exceeded {} tokens. Narrow the query with WHERE, LIMIT or an aggregate.]",
            truncated, max_tokens
        )
    }

    /// Estimate tokens in text (~4 chars per token for English)
    pub fn estimate_tokens(text: &str) -> usize {
        text.len().div_ceil(4)
    }

    pub fn estimate_total_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| match &m.content {
                MessageContent::Text(t) => Self::estimate_tokens(t),
                MessageContent::Parts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => Self::estimate_tokens(text),
                        ContentPart::ToolUse { input, .. } => {
                            Self::estimate_tokens(&input.to_string())
                        }
                    })
                    .sum(),
            })
            .sum()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Snapshot of the history, taken before a turn starts
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.messages.clone())
    }

    /// Put the history back exactly as it was at `checkpoint`
    ///
    /// Used to undo a turn that failed part way through, including any
    /// trimming the failed question caused.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.messages = checkpoint.0;
    }

    /// Drop the oldest whole turns until the context fits
    ///
    /// A turn starts at a user question, so the history never begins with a
    /// dangling tool result or an assistant tool call without its results.
    fn trim_by_tokens(&mut self) {
        while self.estimate_total_tokens() > self.max_context_tokens {
            let next_turn = self
                .messages
                .iter()
                .enumerate()
                .skip(2)
                .find(|(_, m)| is_question(m))
                .map(|(idx, _)| idx);

            let Some(end) = next_turn else {
                break;
            };
            self.messages.drain(1..end);
            tracing::debug!(
                removed = end - 1,
                remaining = self.messages.len(),
                "Trimmed oldest turn to stay within token limit"
            );
        }
    }
}

fn is_question(message: &Message) -> bool {
    message.role == Role::User && matches!(message.content, MessageContent::Text(_))
}

//! Data analysis agent with tool execution

mod chat;
mod context;
mod prompt;

pub use chat::{AgentSettings, Answer, DataAgent};
pub use context::ConversationContext;
pub use prompt::system_prompt;

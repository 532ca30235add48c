//! databot: conversational data analysis over an uploaded CSV
//!
//! This library provides:
//! - Dataset engine: CSV into an in-memory SQLite table `df`, read-only queries
//! - SVG chart rendering for query results
//! - Tool-calling agent on Gemini with query and chart tools
//! - Per-browser sessions with ordered question/answer history
//! - HTTP server with an embedded single-page UI
//! - Optional Langfuse tracing of every agent invocation

pub mod agent;
pub mod config;
pub mod data;
pub mod llm;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod transport;

pub use config::Config;

/// Version string with the build's git hash
pub fn long_version() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), " (", env!("DATABOT_GIT_HASH"), ")")
}

//! Transport layer: HTTP server with browser UI, and one-shot CLI

pub mod cli;
pub mod http;

pub use cli::{run_ask, AskOptions, OutputFormat};
pub use http::{build_router, run_http_server, AppState};

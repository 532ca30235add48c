use anyhow::Result;
use clap::{Parser, Subcommand};
use databot::config::Config;
use databot::transport::{self, AskOptions, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "databot")]
#[command(author, version, long_version = databot::long_version())]
#[command(about = "DataBot - AI agent for data science: upload a CSV and ask questions about it")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: the platform config dir, e.g. ~/.config/databot/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web UI and HTTP API
    Serve {
        /// Port to listen on (default: 8501, or DATABOT_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (default: 0.0.0.0, or DATABOT_HOST)
        #[arg(long)]
        host: Option<String>,
    },

    /// Ask one question about a CSV file and print the answer
    Ask {
        /// CSV file to analyse
        #[arg(short, long)]
        file: PathBuf,

        /// Write a chart answer to this SVG file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// The question
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "databot=debug,tower_http=debug"
    } else {
        "databot=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Configuration problems stop us before anything is bound or read
    let mut config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            tracing::info!(
                host = %config.server.host,
                port = config.server.port,
                model = %config.llm.model,
                tracing = config.tracing_enabled(),
                "Starting DataBot server"
            );
            transport::run_http_server(config).await?;
        }
        Commands::Ask {
            file,
            out,
            format,
            question,
        } => {
            transport::run_ask(
                config,
                AskOptions {
                    file,
                    question,
                    out,
                    format,
                },
            )
            .await?;
        }
    }

    Ok(())
}

//! graphchat CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the chat completion gateway
//! - `query`   — Ask one question from the terminal
//! - `check`   — Validate config and knowledge graph tables
//! - `config`  — Print the default configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "graphchat",
    about = "graphchat — OpenAI-compatible chat over a GraphRAG knowledge graph",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (default: ~/.graphchat/config.toml)
    #[arg(short, long, global = true, env = "GRAPHCHAT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Engine {
    Local,
    Global,
    Combined,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Answer a single question and print it
    Query {
        /// Which search engine answers
        #[arg(short, long, value_enum, default_value_t = Engine::Local)]
        engine: Engine,

        /// The question
        question: String,
    },

    /// Load config and tables, report what was found
    Check,

    /// Print the default configuration file
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Query { engine, question } => {
            commands::query::run(config_path, engine, &question).await?
        }
        Commands::Check => commands::check::run(config_path)?,
        Commands::Config => commands::config_cmd::run(),
    }

    Ok(())
}

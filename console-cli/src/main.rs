///! Console CLI
///!
///! Command-line query browser for the console's metrics endpoint

mod api;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::config::ConfigCommands;
use commands::query::QueryArgs;
use console_monitoring::MonitoringConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Console server address
    #[arg(short, long)]
    server: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long)]
    output: Option<String>,

    /// Bearer token, overriding the stored one
    #[arg(long)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Graph range queries
    Query(QueryArgs),
    /// List suggested spans and their resolution
    Spans,
    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let mut config = config::Config::load().unwrap_or_default();
    let monitoring = MonitoringConfig::load();

    let mut logging = monitoring.logging.clone();
    if let Some(level) = &cli.log_level {
        logging = logging.with_level(level.clone());
    }
    let _log_guard = logging
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let output_format = cli.output.clone().unwrap_or_else(|| config.default_output.clone());

    // Execute command
    match cli.command {
        Commands::Query(args) => {
            // Flag, then environment, then the stored default
            let server = cli
                .server
                .or_else(|| std::env::var("CONSOLE_PROMETHEUS_URL").ok())
                .unwrap_or_else(|| config.default_server.clone());
            let token = cli
                .token
                .or_else(|| config.token.clone())
                .or_else(|| monitoring.endpoint.token.clone());
            let namespace = config
                .namespace
                .clone()
                .or_else(|| monitoring.endpoint.namespace.clone());

            tracing::debug!(server = %server, namespace = ?namespace, "Connecting");
            let client = api::connect(&server, token.as_deref(), monitoring.query_timeout()).await?;
            commands::query::handle_query_command(args, client, &monitoring, namespace, &output_format)
                .await?
        }
        Commands::Spans => commands::spans::handle_spans_command(&monitoring, &output_format)?,
        Commands::Config { command } => {
            commands::config::handle_config_command(command, &mut config, &monitoring, &output_format)?
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
        }
    }

    Ok(())
}

/// Generate shell completions
fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
}

///! CLI configuration commands

use crate::config::{Config, KEYS};
use crate::output::{self, OutputFormat};
use anyhow::Result;
use clap::Subcommand;
use console_monitoring::MonitoringConfig;
use serde::Serialize;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the CLI settings and the resolved query settings
    Show,
    /// Set a CLI setting (server, output, token, namespace)
    Set {
        /// Setting name
        key: String,
        /// New value; empty clears it. The token is prompted for if omitted.
        value: Option<String>,
    },
    /// Print the CLI config file path
    Path,
}

#[derive(Serialize)]
struct ConfigView<'a> {
    cli: CliView<'a>,
    monitoring: &'a MonitoringConfig,
}

#[derive(Serialize)]
struct CliView<'a> {
    server: &'a str,
    output: &'a str,
    token: Option<String>,
    namespace: Option<&'a str>,
}

/// Never print a full token
fn mask_token(token: &str) -> String {
    let head: String = token.chars().take(4).collect();
    format!("{}...", head)
}

pub fn handle_config_command(
    command: ConfigCommands,
    config: &mut Config,
    monitoring: &MonitoringConfig,
    output_format: &str,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let mut monitoring = monitoring.clone();
            monitoring.endpoint.token = monitoring.endpoint.token.as_deref().map(mask_token);

            let view = ConfigView {
                cli: CliView {
                    server: &config.default_server,
                    output: &config.default_output,
                    token: config.token.as_deref().map(mask_token),
                    namespace: config.namespace.as_deref(),
                },
                monitoring: &monitoring,
            };
            let format = match OutputFormat::from_str(output_format) {
                OutputFormat::Json => OutputFormat::Json,
                _ => OutputFormat::Yaml,
            };
            output::print_single(&view, format)?;
        }

        ConfigCommands::Set { key, value } => {
            let value = match value {
                Some(value) => value,
                None if key == "token" => {
                    use dialoguer::Password;
                    Password::new()
                        .with_prompt("Token")
                        .allow_empty_password(true)
                        .interact()?
                }
                None => anyhow::bail!("Missing value for '{}' (keys: {})", key, KEYS.join(", ")),
            };

            config.set(&key, &value)?;
            config.save()?;
            output::print_success(&format!("Saved {}", key));
        }

        ConfigCommands::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }

    Ok(())
}

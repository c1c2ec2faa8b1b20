///! Logging configuration module
///! Provides structured logging with a console layer and an optional rolling file

use serde::{Deserialize, Serialize};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use std::io;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,              // log level (trace, debug, info, warn, error)
    pub file_path: Option<String>,  // log directory
    pub rotation: LogRotation,      // log rotation policy
    pub json_format: bool,          // use JSON formatting on the console
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file_path: None,
            rotation: LogRotation::Daily,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Initialize logging based on configuration.
    ///
    /// Console output goes to stderr so it never interleaves with rendered graphs.
    /// Keep the returned guard alive for as long as file logging should flush.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))?;

        let console_layer = if self.json_format {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_writer(io::stderr)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_writer(io::stderr)
                .boxed()
        };

        let mut guard = None;
        let file_layer = self.file_path.as_ref().map(|path| {
            let file_appender = match self.rotation {
                LogRotation::Hourly => rolling::hourly(path, "console.log"),
                LogRotation::Daily => rolling::daily(path, "console.log"),
                LogRotation::Never => rolling::never(path, "console.log"),
            };

            let (writer, file_guard) = non_blocking(file_appender);
            guard = Some(file_guard);

            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(writer)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::debug!("Logging initialized - level: {}", self.level);

        Ok(guard)
    }

    /// Configuration with a verbosity override, as given on a command line
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Log one completed poll cycle
#[macro_export]
macro_rules! log_poll_cycle {
    ($cycle:expr, $queries:expr, $points:expr) => {
        tracing::debug!(
            cycle = $cycle,
            queries = $queries,
            data_points = $points,
            "Poll cycle settled"
        )
    };
}

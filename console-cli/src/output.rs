///! Output formatting for CLI
///!
///! This module provides unified output formatting across all CLI commands
///! to ensure consistent user experience.

use colored::Colorize;
use console_common::{AxisDomain, GraphDataPoint};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "yaml" | "yml" => OutputFormat::Yaml,
            _ => OutputFormat::Table,
        }
    }
}

/// Print data in the specified format (table, JSON, or YAML)
pub fn print_output<T: Tabled + Serialize>(data: Vec<T>, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => print_table(data),
        OutputFormat::Json => print_json(&data)?,
        OutputFormat::Yaml => print_yaml(&data)?,
    }
    Ok(())
}

/// Print a single item in the specified format
pub fn print_single<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        // Single items have no natural table shape
        OutputFormat::Table | OutputFormat::Json => print_json(data)?,
        OutputFormat::Yaml => print_yaml(data)?,
    }
    Ok(())
}

/// Print data as a table using the tabled crate
pub fn print_table<T: Tabled>(data: Vec<T>) {
    if data.is_empty() {
        println!("{}", "No results found".yellow());
        return;
    }

    let table = Table::new(data);
    println!("{}", table);
}

/// Print data as pretty-printed JSON
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(data)?;
    println!("{}", yaml);
    Ok(())
}

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print an error message with red X
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message with blue i
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a warning message with yellow triangle
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Spinner shown while a query is running
pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Truncate a string to max length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render `points` as a `width` column sparkline over `x_domain`.
///
/// Each column shows the mean of its points scaled into `y_range`; columns with
/// no values are blank so gaps stay visible.
pub fn sparkline(points: &[GraphDataPoint], x_domain: AxisDomain, y_range: (f64, f64), width: usize) -> String {
    let span = x_domain.span();
    if width == 0 || !(span > 0.0) {
        return String::new();
    }

    let mut sums = vec![(0.0, 0usize); width];
    for point in points {
        let Some(y) = point.y else { continue };
        let offset = (point.x as f64 - x_domain.from) / span;
        if !(0.0..=1.0).contains(&offset) {
            continue;
        }
        let column = ((offset * width as f64) as usize).min(width - 1);
        sums[column].0 += y;
        sums[column].1 += 1;
    }

    let (lo, hi) = y_range;
    let range = hi - lo;
    sums.into_iter()
        .map(|(sum, count)| {
            if count == 0 {
                return ' ';
            }
            let mean = sum / count as f64;
            let level = if range > 0.0 {
                (((mean - lo) / range) * (BARS.len() - 1) as f64).round()
            } else {
                0.0
            };
            BARS[(level.max(0.0) as usize).min(BARS.len() - 1)]
        })
        .collect()
}

///! Span commands

use crate::output::{self, OutputFormat};
use anyhow::Result;
use console_monitoring::browser::auto_poll_interval;
use console_monitoring::duration::{default_span_text, SUGGESTED_SPANS};
use console_monitoring::resolution::Resolution;
use console_monitoring::{format_duration, parse_span, MonitoringConfig};
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct SpanRow {
    span: String,
    #[tabled(rename = "max samples")]
    max_samples: usize,
    step: String,
    #[tabled(rename = "auto poll")]
    poll: String,
    #[tabled(rename = "default")]
    is_default: String,
}

fn span_rows(config: &MonitoringConfig) -> Result<Vec<SpanRow>> {
    let default = default_span_text(config.default_span());
    SUGGESTED_SPANS
        .iter()
        .map(|text| {
            let span = parse_span(text)?;
            let samples = Resolution::new(config.limits, span, None).max_samples_for_span();
            let poll = auto_poll_interval(&config.limits, span);
            Ok(SpanRow {
                span: text.to_string(),
                max_samples: samples,
                step: format_duration(span / samples as f64),
                poll: format_duration(poll.as_millis() as f64),
                is_default: if *text == default { "*".to_string() } else { String::new() },
            })
        })
        .collect()
}

/// List the suggested spans with the resolution each one gets
pub fn handle_spans_command(config: &MonitoringConfig, output_format: &str) -> Result<()> {
    let rows = span_rows(config)?;
    output::print_output(rows, OutputFormat::from_str(output_format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_rows() {
        let rows = span_rows(&MonitoringConfig::default()).unwrap();
        assert_eq!(rows.len(), SUGGESTED_SPANS.len());

        let five = &rows[0];
        assert_eq!(five.span, "5m");
        assert_eq!(five.max_samples, 60);
        assert_eq!(five.step, "5s");
        assert_eq!(five.poll, "10s");

        let thirty = rows.iter().find(|r| r.span == "30m").unwrap();
        assert_eq!(thirty.is_default, "*");
        assert_eq!(thirty.max_samples, 300);
        assert_eq!(thirty.poll, "15s");
        assert_eq!(rows.iter().filter(|r| r.is_default == "*").count(), 1);
    }
}

//! Span text handling
//!
//! Spans are written the way the metrics query language writes durations
//! (`30m`, `1h 30m`, `2w`) and handled internally as milliseconds.

use console_common::{Error, Result};

pub const ONE_SECOND: f64 = 1_000.0;
pub const ONE_MINUTE: f64 = 60.0 * ONE_SECOND;
pub const ONE_HOUR: f64 = 60.0 * ONE_MINUTE;
pub const ONE_DAY: f64 = 24.0 * ONE_HOUR;
pub const ONE_WEEK: f64 = 7.0 * ONE_DAY;

/// Largest unit first
const UNITS: [(char, f64); 5] = [
    ('w', ONE_WEEK),
    ('d', ONE_DAY),
    ('h', ONE_HOUR),
    ('m', ONE_MINUTE),
    ('s', ONE_SECOND),
];

/// Span choices offered next to the span text input
pub const SUGGESTED_SPANS: [&str; 11] = [
    "5m", "15m", "30m", "1h", "2h", "6h", "12h", "1d", "2d", "1w", "2w",
];

/// Used when the caller does not ask for a specific span
pub const DEFAULT_TIMESPAN: f64 = 30.0 * ONE_MINUTE;

fn unit_factor(unit: char) -> Option<f64> {
    UNITS.iter().find(|(u, _)| *u == unit).map(|(_, f)| *f)
}

/// Parse `1h 30m` or `1h30m` into milliseconds
pub fn parse_duration(text: &str) -> Result<f64> {
    let invalid = || Error::InvalidDuration(text.to_string());

    let mut total = 0.0;
    let mut digits = String::new();
    let mut parts = 0;

    for c in text.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if c.is_whitespace() {
            // A number must be directly followed by its unit
            if !digits.is_empty() {
                return Err(invalid());
            }
        } else {
            let factor = unit_factor(c).ok_or_else(invalid)?;
            let n: u64 = digits.parse().map_err(|_| invalid())?;
            total += n as f64 * factor;
            digits.clear();
            parts += 1;
        }
    }

    if !digits.is_empty() || parts == 0 {
        return Err(invalid());
    }

    Ok(total)
}

/// Parse a span, rejecting zero-length spans
pub fn parse_span(text: &str) -> Result<f64> {
    let span = parse_duration(text)?;
    if span > 0.0 {
        Ok(span)
    } else {
        Err(Error::InvalidDuration(text.to_string()))
    }
}

/// Format milliseconds as `1h 30m`; empty for negative or non-finite input
pub fn format_duration(ms: f64) -> String {
    if !ms.is_finite() || ms < 0.0 {
        return String::new();
    }

    let mut remaining = ms;
    let mut parts = Vec::new();
    for (unit, factor) in UNITS {
        let n = (remaining / factor).floor();
        if n > 0.0 {
            parts.push(format!("{}{}", n as u64, unit));
            remaining -= n * factor;
        }
    }
    parts.join(" ")
}

/// First suggested span at least as long as `default_timespan`
pub fn default_span_text(default_timespan: f64) -> &'static str {
    SUGGESTED_SPANS
        .iter()
        .copied()
        .find(|s| parse_duration(s).map(|span| span >= default_timespan).unwrap_or(false))
        .unwrap_or(SUGGESTED_SPANS[SUGGESTED_SPANS.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m").unwrap(), 30.0 * ONE_MINUTE);
        assert_eq!(parse_duration("1h 30m").unwrap(), 90.0 * ONE_MINUTE);
        assert_eq!(parse_duration("1h30m").unwrap(), 90.0 * ONE_MINUTE);
        assert_eq!(parse_duration(" 2w ").unwrap(), 2.0 * ONE_WEEK);
        assert_eq!(parse_duration("0s").unwrap(), 0.0);
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("1 h").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    #[test]
    fn test_parse_span_rejects_zero() {
        assert!(parse_span("0m").is_err());
        assert_eq!(parse_span("5m").unwrap(), 5.0 * ONE_MINUTE);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(90.0 * ONE_MINUTE), "1h 30m");
        assert_eq!(format_duration(ONE_WEEK + ONE_DAY + 5.0 * ONE_SECOND), "1w 1d 5s");
        assert_eq!(format_duration(0.0), "");
        assert_eq!(format_duration(-1.0), "");
        assert_eq!(format_duration(f64::NAN), "");
    }

    #[test]
    fn test_format_then_parse() {
        let span = 2.0 * ONE_DAY + 3.0 * ONE_HOUR;
        assert_eq!(parse_duration(&format_duration(span)).unwrap(), span);
    }

    #[test]
    fn test_default_span_text() {
        assert_eq!(default_span_text(DEFAULT_TIMESPAN), "30m");
        assert_eq!(default_span_text(20.0 * ONE_MINUTE), "30m");
        assert_eq!(default_span_text(ONE_MINUTE), "5m");
        assert_eq!(default_span_text(100.0 * ONE_WEEK), "2w");
    }
}

///! Series formatting
///!
///! Turns raw `[timestamp, "value"]` samples into graph points and formats
///! values for axis ticks and legends.

use console_common::{GraphDataPoint, PrometheusValue};

const SI_UNITS: [&str; 9] = ["", "k", "M", "G", "T", "P", "E", "Z", "Y"];

/// Parse a sample value; anything that isn't a finite number becomes a gap
pub fn parse_sample_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Convert raw samples to points stepped at `span / samples`.
///
/// Each expected timestamp between the first and last sample that has no
/// sample at or before it gets a null point, so the line shows a gap instead of
/// interpolating across the missing data.
pub fn format_series_values(
    values: &[PrometheusValue],
    samples: usize,
    span: f64,
) -> Vec<GraphDataPoint> {
    let points: Vec<GraphDataPoint> = values
        .iter()
        .map(|v| {
            let x = (v.timestamp_secs() * 1000.0).round() as i64;
            GraphDataPoint::new(x, parse_sample_value(v.raw_value()))
        })
        .collect();

    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first.x as f64, last.x as f64),
        _ => return points,
    };
    if samples == 0 || !(span > 0.0) || last <= first {
        return points;
    }

    let step = span / samples as f64;
    let expected = ((last - first) / step).ceil() as usize;

    let mut filled = Vec::with_capacity(points.len().max(expected));
    let mut rest = points.into_iter().peekable();
    for i in 0..expected {
        let t = (first + i as f64 * step).round() as i64;
        match rest.peek() {
            Some(p) if p.x > t => filled.push(GraphDataPoint::gap(t)),
            Some(_) => filled.extend(rest.next()),
            None => break,
        }
    }
    filled.extend(rest);

    filled
}

/// Total number of raw samples across a set of series
pub fn count_data_points<'a, I>(series: I) -> usize
where
    I: IntoIterator<Item = &'a [PrometheusValue]>,
{
    series.into_iter().map(|values| values.len()).sum()
}

fn trim_number(value: f64) -> String {
    let text = if value.abs() >= 1.0 {
        format!("{:.2}", value)
    } else {
        format!("{:.3}", value)
    };
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

/// Humanize with SI suffixes: 1500 -> "1.5k"
pub fn humanize_number_si(value: f64) -> String {
    let mut scaled = value;
    let mut unit = 0;
    while scaled.abs() >= 1000.0 && unit < SI_UNITS.len() - 1 {
        scaled /= 1000.0;
        unit += 1;
    }
    format!("{}{}", trim_number(scaled), SI_UNITS[unit])
}

fn format_positive_value(v: f64) -> String {
    // Exponential notation for tiny or huge values keeps labels short
    if v == 0.0 || (0.001..1e23).contains(&v) {
        humanize_number_si(v)
    } else {
        format!("{:.1e}", v)
    }
}

/// Format a value for axis ticks and tooltips
pub fn format_value(v: f64) -> String {
    let sign = if v < 0.0 { "-" } else { "" };
    format!("{}{}", sign, format_positive_value(v.abs()))
}

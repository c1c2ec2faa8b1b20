//! Render model for the query browser graph
//!
//! Everything a renderer needs to draw one frame: which series are visible, the
//! axis domains and tick formatting. Nothing here knows how to draw.

use chrono::{Local, TimeZone};
use console_common::{prometheus::format_labels, AxisDomain, GraphSeries, PrometheusLabels};

use crate::duration::ONE_MINUTE;
use crate::format::format_value;

/// One line (or stacked area) of the graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphLine<'a> {
    /// Index of the query the series came from
    pub query_index: usize,
    pub labels: &'a PrometheusLabels,
    /// `None` when the user disabled this series
    pub series: Option<&'a GraphSeries>,
}

/// A frame of the graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphModel<'a> {
    pub lines: Vec<GraphLine<'a>>,
    pub x_domain: AxisDomain,
    /// `None` lets the renderer choose
    pub y_domain: Option<(f64, f64)>,
    pub is_stack: bool,
    /// Use exponential Y ticks because the range is very narrow
    pub exponential_ticks: bool,
    pub show_seconds: bool,
}

impl<'a> GraphModel<'a> {
    /// Build a frame from per-query series.
    ///
    /// `disabled_series[i]` lists the label sets hidden for query `i`.
    pub fn build(
        all_series: &'a [Vec<GraphSeries>],
        disabled_series: &[Vec<PrometheusLabels>],
        is_stack: bool,
        span: f64,
        x_domain: Option<AxisDomain>,
        now: f64,
    ) -> Self {
        let mut lines = Vec::new();
        for (query_index, series_list) in all_series.iter().enumerate() {
            let disabled = disabled_series.get(query_index);
            for series in series_list {
                let hidden = disabled.map_or(false, |d| d.contains(&series.labels));
                lines.push(GraphLine {
                    query_index,
                    labels: &series.labels,
                    series: if hidden { None } else { Some(series) },
                });
            }
        }

        let x_domain = x_domain.unwrap_or_else(|| AxisDomain::new(now - span, now));

        let mut exponential_ticks = false;
        let y_domain = if is_stack {
            let all_zero = all_series
                .iter()
                .flatten()
                .flat_map(|s| s.points.iter())
                .all(|p| p.y == Some(0.0));
            if all_zero {
                Some((-1.0, 1.0))
            } else {
                None
            }
        } else {
            let values = lines
                .iter()
                .filter_map(|l| l.series)
                .flat_map(|s| s.points.iter())
                .filter_map(|p| p.y);
            let (min_y, max_y) = values.fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), v| {
                (Some(lo.map_or(v, |lo| lo.min(v))), Some(hi.map_or(v, |hi| hi.max(v))))
            });
            let (mut min_y, mut max_y) = (min_y.unwrap_or(0.0), max_y.unwrap_or(0.0));

            if min_y == 0.0 && max_y == 0.0 {
                min_y = -1.0;
                max_y = 1.0;
            } else if min_y > 0.0 && max_y > 0.0 {
                min_y = 0.0;
            } else if min_y < 0.0 && max_y < 0.0 {
                max_y = 0.0;
            }

            exponential_ticks = (max_y - min_y).abs() < 0.005;
            Some((min_y, max_y))
        };

        Self {
            lines,
            x_domain,
            y_domain,
            is_stack,
            exponential_ticks,
            show_seconds: span < 5.0 * ONE_MINUTE,
        }
    }

    /// Legend text for every line, in order
    pub fn legend(&self) -> Vec<String> {
        self.lines.iter().map(|l| format_labels(l.labels)).collect()
    }

    pub fn format_y_tick(&self, v: f64) -> String {
        if self.exponential_ticks {
            if v == 0.0 {
                "0".to_string()
            } else {
                format!("{:.1e}", v)
            }
        } else {
            format_value(v)
        }
    }

    pub fn format_x_tick(&self, ms: f64) -> String {
        format_time(ms, self.show_seconds)
    }
}

/// Local 24-hour clock time for a millisecond timestamp
pub fn format_time(ms: f64, show_seconds: bool) -> String {
    match Local.timestamp_millis_opt(ms as i64).single() {
        Some(time) if show_seconds => time.format("%H:%M:%S").to_string(),
        Some(time) => time.format("%H:%M").to_string(),
        None => String::new(),
    }
}

/// Stacking is only worth it for a handful of series
pub fn should_stack(requested: bool, all_series: &[Vec<GraphSeries>], max_stacks: usize) -> bool {
    requested && all_series.iter().map(Vec::len).sum::<usize>() <= max_stacks
}

//! Common types and utilities shared between console-monitoring and console-cli

pub mod prometheus;

pub use prometheus::{PrometheusLabels, PrometheusResponse, PrometheusResult, PrometheusValue};

use serde::{Deserialize, Serialize};

/// Substring the query engine reports for results that cannot be graphed
pub const RANGE_VECTOR_ERROR: &str = "invalid expression type \"range vector\"";

/// A point on a graph; `y == None` is a gap, not a zero
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphDataPoint {
    pub x: i64,          // Milliseconds since the epoch
    pub y: Option<f64>,
}

impl GraphDataPoint {
    pub fn new(x: i64, y: Option<f64>) -> Self {
        Self { x, y }
    }

    pub fn gap(x: i64) -> Self {
        Self { x, y: None }
    }

    pub fn is_gap(&self) -> bool {
        self.y.is_none()
    }
}

/// Explicit `[from, to)` time window, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisDomain {
    pub from: f64,
    pub to: f64,
}

impl AxisDomain {
    pub fn new(from: f64, to: f64) -> Self {
        Self { from, to }
    }

    pub fn span(&self) -> f64 {
        self.to - self.from
    }
}

/// One labeled series after gap filling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSeries {
    pub labels: PrometheusLabels,
    pub points: Vec<GraphDataPoint>,
}

/// One row of the query browser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryObj {
    pub query: String,
    pub is_enabled: bool,
    #[serde(default)]
    pub is_expanded: bool,
    /// Label sets returned by the last successful poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<PrometheusLabels>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_series: Vec<PrometheusLabels>,
}

impl QueryObj {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            is_enabled: true,
            is_expanded: true,
            series: None,
            disabled_series: Vec::new(),
        }
    }

    /// Text to run, or `None` if the row is disabled or blank
    pub fn runnable(&self) -> Option<&str> {
        let query = self.query.trim();
        if self.is_enabled && !query.is_empty() {
            Some(query)
        } else {
            None
        }
    }
}

/// Query browser error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API request failed: {status} - {message}")]
    Api {
        status: u16,
        error_type: Option<String>,
        message: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The query returned range vectors, which have no graphable shape
    pub fn is_range_vector(&self) -> bool {
        match self {
            Error::Api { message, .. } => message.contains(RANGE_VECTOR_ERROR),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

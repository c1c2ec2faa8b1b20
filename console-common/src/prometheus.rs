///! Wire types for the metrics range-query API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label set identifying one series
pub type PrometheusLabels = BTreeMap<String, String>;

/// A single `[timestamp, "value"]` sample, timestamp in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusValue(pub f64, pub String);

impl PrometheusValue {
    pub fn new(timestamp_secs: f64, value: impl Into<String>) -> Self {
        Self(timestamp_secs, value.into())
    }

    pub fn timestamp_secs(&self) -> f64 {
        self.0
    }

    pub fn raw_value(&self) -> &str {
        &self.1
    }
}

/// Result type reported by the query engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Matrix,
    Vector,
    Scalar,
    String,
}

/// One series returned by a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusResult {
    #[serde(default)]
    pub metric: PrometheusLabels,
    #[serde(default)]
    pub values: Vec<PrometheusValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PrometheusValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusData {
    #[serde(rename = "resultType")]
    pub result_type: ResultType,
    #[serde(default)]
    pub result: Vec<PrometheusResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Envelope returned by every query endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrometheusData>,
    #[serde(rename = "errorType", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PrometheusResponse {
    /// Series of a successful response (empty if the response carries no data)
    pub fn into_results(self) -> Vec<PrometheusResult> {
        self.data.map(|d| d.result).unwrap_or_default()
    }
}

/// Format a label set as `name{k="v", ...}`
pub fn format_labels(labels: &PrometheusLabels) -> String {
    let name = labels.get("__name__").map(String::as_str).unwrap_or("");
    let rest: Vec<String> = labels
        .iter()
        .filter(|(k, _)| k.as_str() != "__name__")
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();

    if rest.is_empty() {
        name.to_string()
    } else {
        format!("{}{{{}}}", name, rest.join(", "))
    }
}

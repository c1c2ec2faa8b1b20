///! Metrics range-query client

use async_trait::async_trait;
use console_common::{
    prometheus::ResponseStatus, Error, PrometheusResponse, PrometheusResult, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

pub const PROMETHEUS_BASE_PATH: &str = "/api/prometheus";
pub const PROMETHEUS_TENANCY_BASE_PATH: &str = "/api/prometheus-tenancy";
pub const QUERY_RANGE_ENDPOINT: &str = "api/v1/query_range";

/// Local request timeout: the default server-side query timeout plus slack
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// One range query, times in milliseconds
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub query: String,
    pub timespan: f64,
    pub end_time: f64,
    pub samples: usize,
    pub namespace: Option<String>,
    pub timeout: Option<String>,
}

impl RangeQuery {
    pub fn start_secs(&self) -> f64 {
        (self.end_time - self.timespan) / 1000.0
    }

    pub fn end_secs(&self) -> f64 {
        self.end_time / 1000.0
    }

    /// Step in whole seconds, never below one
    pub fn step_secs(&self) -> u64 {
        let step = (self.timespan / 1000.0 / self.samples.max(1) as f64).floor();
        if step >= 1.0 {
            step as u64
        } else {
            1
        }
    }

    fn base_path(&self) -> &'static str {
        if self.namespace.is_some() {
            PROMETHEUS_TENANCY_BASE_PATH
        } else {
            PROMETHEUS_BASE_PATH
        }
    }

    /// Query string parameters in request order
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("query", self.query.clone())];
        if let Some(namespace) = &self.namespace {
            params.push(("namespace", namespace.clone()));
        }
        params.push(("start", self.start_secs().to_string()));
        params.push(("end", self.end_secs().to_string()));
        params.push(("step", self.step_secs().to_string()));
        if let Some(timeout) = &self.timeout {
            params.push(("timeout", timeout.clone()));
        }
        params
    }

    /// Full request URL under `base_url`
    pub fn url(&self, base_url: &str) -> String {
        let query_string = self
            .params()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&");

        format!(
            "{}{}/{}?{}",
            base_url.trim_end_matches('/'),
            self.base_path(),
            QUERY_RANGE_ENDPOINT,
            query_string
        )
    }
}

/// Anything that can answer range queries
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn query_range(&self, request: &RangeQuery) -> Result<Vec<PrometheusResult>>;
}

/// HTTP client for the console's metrics proxy
pub struct PrometheusClient {
    base_url: String,
    client: reqwest::Client,
    token: Arc<RwLock<Option<String>>>,
}

impl PrometheusClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set the authentication token
    pub async fn set_token(&self, token: String) {
        let mut t = self.token.write().await;
        *t = Some(token);
    }

    /// Build request with authentication header
    async fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);

        if let Some(token) = self.token.read().await.as_ref() {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        request
    }
}

fn http_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::Decode(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn query_range(&self, request: &RangeQuery) -> Result<Vec<PrometheusResult>> {
        let url = request.url(&self.base_url);
        debug!(url = %url, samples = request.samples, "Range query");

        let response = self
            .build_request(&url)
            .await
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The query engine explains failures in a JSON envelope
            return Err(match serde_json::from_str::<PrometheusResponse>(&body) {
                Ok(envelope) => Error::Api {
                    status: status.as_u16(),
                    error_type: envelope.error_type,
                    message: envelope.error.unwrap_or_else(|| status.to_string()),
                },
                Err(_) => Error::Api {
                    status: status.as_u16(),
                    error_type: None,
                    message: if body.is_empty() { status.to_string() } else { body },
                },
            });
        }

        let envelope: PrometheusResponse = response.json().await.map_err(http_error)?;
        if envelope.status == ResponseStatus::Error {
            return Err(Error::Api {
                status: status.as_u16(),
                error_type: envelope.error_type,
                message: envelope.error.unwrap_or_default(),
            });
        }

        Ok(envelope.into_results())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(namespace: Option<&str>) -> RangeQuery {
        RangeQuery {
            query: "sum(rate(x[5m])) by (pod)".to_string(),
            timespan: 30.0 * 60_000.0,
            end_time: 1_700_000_000_000.0,
            samples: 60,
            namespace: namespace.map(str::to_string),
            timeout: Some("30s".to_string()),
        }
    }

    #[test]
    fn test_time_params() {
        let request = request(None);
        assert_eq!(request.end_secs(), 1_700_000_000.0);
        assert_eq!(request.start_secs(), 1_699_998_200.0);
        // 1800s / 60 samples
        assert_eq!(request.step_secs(), 30);
    }

    #[test]
    fn test_step_never_below_one_second() {
        let request = RangeQuery {
            timespan: 30_000.0,
            samples: 300,
            ..request(None)
        };
        assert_eq!(request.step_secs(), 1);
    }

    #[test]
    fn test_url_without_namespace() {
        let url = request(None).url("http://console.local/");
        assert!(url.starts_with("http://console.local/api/prometheus/api/v1/query_range?query="));
        assert!(url.contains("query=sum%28rate%28x%5B5m%5D%29%29%20by%20%28pod%29"));
        assert!(url.contains("&step=30"));
        assert!(url.ends_with("&timeout=30s"));
        assert!(!url.contains("namespace="));
    }

    #[test]
    fn test_url_with_namespace_uses_tenancy_path() {
        let url = request(Some("team-a")).url("http://console.local");
        assert!(url.starts_with("http://console.local/api/prometheus-tenancy/api/v1/query_range?"));
        assert!(url.contains("&namespace=team-a&"));
    }

    #[tokio::test]
    async fn test_token_management() {
        let client = PrometheusClient::new("http://console.local/").unwrap();
        assert_eq!(client.base_url(), "http://console.local");
        assert!(client.token.read().await.is_none());

        client.set_token("abc".to_string()).await;
        assert_eq!(client.token.read().await.as_deref(), Some("abc"));
    }
}

//! End-to-end tests against a fake metrics proxy
//!
//! The proxy is a small axum app bound to an ephemeral port. It records every
//! request and answers range queries with synthetic series.
//!
//! Run with: cargo test --test query_browser_tests

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use console_common::Error;
use console_monitoring::{
    BrowserOptions, MetricsSource, PollSetting, PrometheusClient, QueryBrowser,
    QueryBrowserState, RangeQuery, SamplingLimits, TickOutcome,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const NOW: f64 = 1_700_000_000_000.0;

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    params: HashMap<String, String>,
    authorization: Option<String>,
}

#[derive(Clone)]
struct FakeProxy {
    series_per_query: usize,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeProxy {
    fn recorded(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn series_values(params: &HashMap<String, String>) -> Vec<Value> {
    let start: f64 = params["start"].parse().unwrap();
    let end: f64 = params["end"].parse().unwrap();
    let step: f64 = params["step"].parse().unwrap();

    let mut values = Vec::new();
    let mut t = start;
    while t <= end {
        values.push(json!([t, "1.5"]));
        t += step;
    }
    values
}

async fn handle_query_range(
    path: &str,
    proxy: FakeProxy,
    headers: HeaderMap,
    params: HashMap<String, String>,
) -> (StatusCode, Json<Value>) {
    proxy.requests.lock().unwrap().push(Recorded {
        path: path.to_string(),
        params: params.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    let query = params.get("query").cloned().unwrap_or_default();
    if query.ends_with(']') {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "errorType": "bad_data",
                "error": "invalid parameter \"query\": invalid expression type \"range vector\" for range query, must be Scalar or instant Vector"
            })),
        );
    }

    let values = series_values(&params);
    let result: Vec<Value> = (0..proxy.series_per_query)
        .map(|i| {
            json!({
                "metric": { "__name__": query, "instance": format!("node-{}", i) },
                "values": values,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "data": { "resultType": "matrix", "result": result }
        })),
    )
}

async fn query_range(
    State(proxy): State<FakeProxy>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    handle_query_range("/api/prometheus", proxy, headers, params).await
}

async fn tenancy_query_range(
    State(proxy): State<FakeProxy>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    handle_query_range("/api/prometheus-tenancy", proxy, headers, params).await
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::BAD_GATEWAY, "upstream unavailable")
}

async fn hanging() -> (StatusCode, &'static str) {
    tokio::time::sleep(Duration::from_secs(60)).await;
    (StatusCode::OK, "too late")
}

/// Start the fake proxy and return its base URL
async fn start_proxy(series_per_query: usize) -> (String, FakeProxy) {
    let proxy = FakeProxy {
        series_per_query,
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/api/prometheus/api/v1/query_range", get(query_range))
        .route("/api/prometheus-tenancy/api/v1/query_range", get(tenancy_query_range))
        .route("/broken/api/prometheus/api/v1/query_range", get(broken))
        .route("/hanging/api/prometheus/api/v1/query_range", get(hanging))
        .with_state(proxy.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), proxy)
}

fn range_query(query: &str, namespace: Option<&str>) -> RangeQuery {
    RangeQuery {
        query: query.to_string(),
        timespan: 30.0 * 60_000.0,
        end_time: NOW,
        samples: 60,
        namespace: namespace.map(str::to_string),
        timeout: Some("30s".to_string()),
    }
}

#[tokio::test]
async fn test_client_fetches_matrix() {
    let (base_url, proxy) = start_proxy(2).await;
    let client = PrometheusClient::new(&base_url).unwrap();

    let results = client.query_range(&range_query("up", None)).await.unwrap();
    assert_eq!(results.len(), 2);
    // 1800s at a 30s step, both ends included
    assert_eq!(results[0].values.len(), 61);
    assert_eq!(results[0].values[0].raw_value(), "1.5");
    assert_eq!(results[1].metric["instance"], "node-1");

    let recorded = proxy.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].path, "/api/prometheus");
    assert_eq!(recorded[0].params["query"], "up");
    assert_eq!(recorded[0].params["start"], "1699998200");
    assert_eq!(recorded[0].params["end"], "1700000000");
    assert_eq!(recorded[0].params["step"], "30");
    assert_eq!(recorded[0].params["timeout"], "30s");
    assert!(!recorded[0].params.contains_key("namespace"));
    assert!(recorded[0].authorization.is_none());
}

#[tokio::test]
async fn test_namespace_uses_tenancy_endpoint() {
    let (base_url, proxy) = start_proxy(1).await;
    let client = PrometheusClient::new(&base_url).unwrap();

    client
        .query_range(&range_query("sum(rate(http_requests_total[5m]))", Some("team-a")))
        .await
        .unwrap();

    let recorded = proxy.recorded();
    assert_eq!(recorded[0].path, "/api/prometheus-tenancy");
    assert_eq!(recorded[0].params["namespace"], "team-a");
    assert_eq!(recorded[0].params["query"], "sum(rate(http_requests_total[5m]))");
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let (base_url, proxy) = start_proxy(1).await;
    let client = PrometheusClient::new(&base_url).unwrap();
    client.set_token("secret".to_string()).await;

    client.query_range(&range_query("up", None)).await.unwrap();
    assert_eq!(proxy.recorded()[0].authorization.as_deref(), Some("Bearer secret"));
}

#[tokio::test]
async fn test_range_vector_error() {
    let (base_url, _proxy) = start_proxy(1).await;
    let client = PrometheusClient::new(&base_url).unwrap();

    let err = client
        .query_range(&range_query("http_requests_total[5m]", None))
        .await
        .unwrap_err();

    match &err {
        Error::Api {
            status, error_type, ..
        } => {
            assert_eq!(*status, 400);
            assert_eq!(error_type.as_deref(), Some("bad_data"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_range_vector());
}

#[tokio::test]
async fn test_non_json_error_body() {
    let (base_url, _proxy) = start_proxy(1).await;
    let client = PrometheusClient::new(&format!("{}/broken", base_url)).unwrap();

    let err = client.query_range(&range_query("up", None)).await.unwrap_err();
    assert_eq!(
        err,
        Error::Api {
            status: 502,
            error_type: None,
            message: "upstream unavailable".to_string(),
        }
    );
}

#[tokio::test]
async fn test_hanging_request_times_out() {
    let (base_url, _proxy) = start_proxy(1).await;
    let client =
        PrometheusClient::with_timeout(&format!("{}/hanging", base_url), Duration::from_millis(200)).unwrap();

    let started = std::time::Instant::now();
    let err = client.query_range(&range_query("up", None)).await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_unreachable_server() {
    // Nothing listens on the discard port
    let client = PrometheusClient::new("http://127.0.0.1:9").unwrap();
    let err = client.query_range(&range_query("up", None)).await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));
}

#[tokio::test]
async fn test_browser_resamples_against_server() {
    let (base_url, proxy) = start_proxy(20).await;
    let client = Arc::new(PrometheusClient::new(&base_url).unwrap());
    let mut browser = QueryBrowser::new(client, SamplingLimits::default(), BrowserOptions::default());
    let mut state = QueryBrowserState::with_queries(["cpu", "memory"], PollSetting::Off);

    // 2 queries x 20 series x 301 points is over the soft limit
    let outcome = browser.tick(&mut state, NOW).await;
    assert_eq!(outcome, TickOutcome::Resampled(149));

    let outcome = browser.tick(&mut state, NOW).await;
    assert!(matches!(outcome, TickOutcome::Rendered { .. }));
    assert_eq!(browser.samples(), 149);

    let recorded = proxy.recorded();
    assert_eq!(recorded.len(), 4);
    assert!(recorded[..2].iter().all(|r| r.params["step"] == "6"));
    assert!(recorded[2..].iter().all(|r| r.params["step"] == "12"));

    let data = browser.graph_data().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0].len(), 20);
    assert!(data[0][0].points.iter().all(|p| p.y == Some(1.5)));

    let snapshot = browser.snapshot(&state);
    assert!(snapshot.reduced_resolution());
    // Too many series to stack
    assert!(!snapshot.is_stack);
    assert_eq!(state.query(1).unwrap().series.as_ref().unwrap().len(), 20);
}

#[tokio::test]
async fn test_browser_surfaces_range_vector_error() {
    let (base_url, _proxy) = start_proxy(1).await;
    let client = Arc::new(PrometheusClient::new(&base_url).unwrap());
    let mut browser = QueryBrowser::new(client, SamplingLimits::default(), BrowserOptions::default());
    let mut state = QueryBrowserState::with_queries(["up", "up[5m]"], PollSetting::Off);

    let outcome = browser.tick(&mut state, NOW).await;
    assert!(matches!(outcome, TickOutcome::Failed(ref e) if e.is_range_vector()));
    assert_eq!(browser.snapshot(&state).view(), console_monitoring::BrowserView::RangeVector);
}

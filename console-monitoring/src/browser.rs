//! Query browser graph controller
//!
//! Polls one range query per enabled row, adapts the sample count to the size of
//! the result and republishes the series into the owned [`QueryBrowserState`].
//!
//! A poll cycle is split in three steps so it can be superseded while in flight:
//! [`QueryBrowser::begin_cycle`] snapshots the request parameters and cancels the
//! previous cycle, [`PollCycle::run`] performs the requests without borrowing the
//! browser, and [`QueryBrowser::apply`] folds the outcome back in. Outcomes of
//! cancelled or superseded cycles are dropped without touching any state.

use console_common::{
    AxisDomain, Error, GraphSeries, PrometheusLabels, PrometheusResult, QueryObj, Result,
};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{MetricsSource, RangeQuery};
use crate::config::{MonitoringConfig, PollSetting, SamplingLimits};
use crate::duration::{self, DEFAULT_TIMESPAN};
use crate::format::{count_data_points, format_series_values};
use crate::graph::{should_stack, GraphModel};
use crate::resolution::{Resolution, SampleDecision};
use crate::state::{QueryBrowserState, QueryPatch};
use crate::zoom::ZoomHandler;

/// Poll at roughly this many samples' worth of wall-clock time
const POLL_SAMPLES_PER_SPAN: f64 = 120.0;

/// Fixed settings of one query browser panel
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Overrides the span-derived sample count
    pub default_samples: Option<usize>,
    /// Starting span is the first suggested span at least this long
    pub default_timespan: f64,
    /// Explicit starting span; wins over `default_timespan`
    pub timespan: Option<f64>,
    pub namespace: Option<String>,
    /// Series with one of these labels set to a different value are dropped
    pub filter_labels: Option<PrometheusLabels>,
    pub is_stack: bool,
    /// Server-side query timeout
    pub timeout: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            default_samples: None,
            default_timespan: DEFAULT_TIMESPAN,
            timespan: None,
            namespace: None,
            filter_labels: None,
            is_stack: false,
            timeout: Some("30s".to_string()),
        }
    }
}

impl BrowserOptions {
    /// Options for a browser backed by `config`
    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self {
            default_timespan: config.default_span(),
            namespace: config.endpoint.namespace.clone(),
            timeout: Some(config.endpoint.query_timeout.clone()),
            ..Default::default()
        }
    }
}

/// Result of folding a cycle back into the browser
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// New graph data is available
    Rendered { data_points: usize },
    /// The result was discarded; fetch again at this many samples
    Resampled(usize),
    DatasetTooLarge,
    Failed(Error),
    /// Aborted on purpose; nothing changed
    Cancelled,
    /// A newer cycle has started since; nothing changed
    Stale,
    /// Graphs are hidden so nothing was fetched
    Skipped,
}

/// What a renderer should show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserView {
    Hidden,
    /// Results include range vectors
    RangeVector,
    DatasetTooLarge,
    /// No series; `loaded` is false while the first fetch is running
    Empty { loaded: bool },
    Graph,
}

/// Everything a renderer needs, detached from the browser
#[derive(Debug, Clone, Default)]
pub struct BrowserSnapshot {
    pub span: f64,
    pub samples: usize,
    pub max_samples_for_span: usize,
    pub x_domain: Option<AxisDomain>,
    pub graph_data: Option<Vec<Vec<GraphSeries>>>,
    pub error: Option<Error>,
    pub dataset_too_large: bool,
    pub updating: bool,
    pub is_stack: bool,
    pub hide_graphs: bool,
    pub namespace: Option<String>,
    pub queries: Vec<QueryObj>,
}

impl BrowserSnapshot {
    pub fn view(&self) -> BrowserView {
        let is_range_vector = self.error.as_ref().map_or(false, Error::is_range_vector);
        if self.hide_graphs {
            BrowserView::Hidden
        } else if is_range_vector {
            BrowserView::RangeVector
        } else if self.dataset_too_large {
            BrowserView::DatasetTooLarge
        } else if self.is_graph_data_empty() {
            BrowserView::Empty {
                loaded: !self.updating,
            }
        } else {
            BrowserView::Graph
        }
    }

    pub fn is_graph_data_empty(&self) -> bool {
        self.graph_data
            .as_ref()
            .map_or(true, |data| data.iter().all(Vec::is_empty))
    }

    /// Error to show inline; range-vector errors get their own empty state
    pub fn visible_error(&self) -> Option<&Error> {
        self.error.as_ref().filter(|e| !e.is_range_vector())
    }

    /// Rendered below the resolution the span would allow
    pub fn reduced_resolution(&self) -> bool {
        !self.updating && !self.is_graph_data_empty() && self.samples < self.max_samples_for_span
    }

    pub fn disabled_series(&self) -> Vec<Vec<PrometheusLabels>> {
        self.queries.iter().map(|q| q.disabled_series.clone()).collect()
    }

    /// Graph frame for drawing at wall-clock time `now`
    pub fn graph_model<'a>(
        &'a self,
        disabled_series: &[Vec<PrometheusLabels>],
        now: f64,
    ) -> Option<GraphModel<'a>> {
        let data = self.graph_data.as_ref()?;
        Some(GraphModel::build(
            data,
            disabled_series,
            self.is_stack,
            self.span,
            self.x_domain,
            now,
        ))
    }
}

/// Changes coming from the controls around the graph
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserCommand {
    /// Span text control; clears any zoom
    SetSpan(f64),
    /// Back to the default span
    ResetZoom,
    Zoom(AxisDomain),
    SetNamespace(Option<String>),
    AddQuery(String),
    PatchQuery(usize, QueryPatch),
    ToggleSeries(usize, PrometheusLabels),
    SetHideGraphs(bool),
    SetPoll(PollSetting),
    Refresh,
}

/// Requests of one poll cycle, ready to run
pub struct PollCycle {
    id: u64,
    token: CancellationToken,
    source: Arc<dyn MetricsSource>,
    requests: Vec<Option<RangeQuery>>,
}

/// Raw result of a poll cycle
#[derive(Debug)]
pub struct CycleOutcome {
    id: u64,
    results: Result<Vec<Option<Vec<PrometheusResult>>>>,
}

impl CycleOutcome {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PollCycle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn requests(&self) -> &[Option<RangeQuery>] {
        &self.requests
    }

    /// Run every request concurrently; the first failure fails the cycle
    pub async fn run(self) -> CycleOutcome {
        let PollCycle {
            id,
            token,
            source,
            requests,
        } = self;

        let fetches = requests.iter().map(|request| {
            let token = token.clone();
            let source = source.clone();
            async move {
                let Some(request) = request else {
                    return Ok(None);
                };
                tokio::select! {
                    _ = token.cancelled() => Err(Error::Cancelled),
                    result = source.query_range(request) => result.map(Some),
                }
            }
        });

        let settled = join_all(fetches).await;
        let results = if token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            settled.into_iter().collect()
        };

        CycleOutcome { id, results }
    }
}

pub struct QueryBrowser {
    source: Arc<dyn MetricsSource>,
    limits: SamplingLimits,
    options: BrowserOptions,
    default_span_text: &'static str,
    span: f64,
    samples: usize,
    x_domain: Option<AxisDomain>,
    graph_data: Option<Vec<Vec<GraphSeries>>>,
    error: Option<Error>,
    dataset_too_large: bool,
    updating: bool,
    cycle_id: u64,
    current: Option<CancellationToken>,
    queries_key: Option<String>,
    zoom: ZoomHandler,
}

impl QueryBrowser {
    pub fn new(source: Arc<dyn MetricsSource>, limits: SamplingLimits, options: BrowserOptions) -> Self {
        let default_span_text = duration::default_span_text(options.default_timespan);
        let span = options
            .timespan
            .filter(|s| *s > 0.0)
            .or_else(|| duration::parse_span(default_span_text).ok())
            .unwrap_or(DEFAULT_TIMESPAN);
        let samples = Resolution::new(limits, span, options.default_samples).max_samples_for_span();

        Self {
            source,
            limits,
            options,
            default_span_text,
            span,
            samples,
            x_domain: None,
            graph_data: None,
            error: None,
            dataset_too_large: false,
            updating: true,
            cycle_id: 0,
            current: None,
            queries_key: None,
            zoom: ZoomHandler::new(),
        }
    }

    pub fn span(&self) -> f64 {
        self.span
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn x_domain(&self) -> Option<AxisDomain> {
        self.x_domain
    }

    /// Fixed end of the window, set while zoomed into history
    pub fn end_time(&self) -> Option<f64> {
        self.x_domain.map(|d| d.to)
    }

    pub fn default_span_text(&self) -> &'static str {
        self.default_span_text
    }

    pub fn namespace(&self) -> Option<&str> {
        self.options.namespace.as_deref()
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn graph_data(&self) -> Option<&[Vec<GraphSeries>]> {
        self.graph_data.as_deref()
    }

    pub fn limits(&self) -> &SamplingLimits {
        &self.limits
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.limits, self.span, self.options.default_samples)
    }

    pub fn zoom_handler(&mut self) -> &mut ZoomHandler {
        &mut self.zoom
    }

    fn mark_updating(&mut self) {
        self.updating = true;
    }

    /// Span control change; drops any zoom window
    pub fn set_span(&mut self, span: f64) -> Result<()> {
        if !(span > 0.0) || !span.is_finite() {
            return Err(Error::InvalidDuration(span.to_string()));
        }
        let changed = span != self.span || self.x_domain.is_some();
        self.x_domain = None;
        self.span = span;
        self.samples = self.resolution().clamp(self.samples);
        if changed {
            self.mark_updating();
        }
        Ok(())
    }

    pub fn set_span_text(&mut self, text: &str) -> Result<()> {
        let span = duration::parse_span(text)?;
        self.set_span(span)
    }

    pub fn reset_zoom(&mut self) -> Result<()> {
        self.set_span_text(self.default_span_text)
    }

    /// Show an explicit window; polling stops until the span is reset
    pub fn apply_zoom(&mut self, domain: AxisDomain) {
        let mut domain = domain;
        if domain.span() < self.limits.min_span {
            let middle = (domain.from + domain.to) / 2.0;
            domain = AxisDomain::new(middle - self.limits.min_span / 2.0, middle + self.limits.min_span / 2.0);
        }
        self.x_domain = Some(domain);
        self.span = domain.span();
        self.samples = self.resolution().clamp(self.samples);
        self.mark_updating();
    }

    /// Complete a drag on a `width` pixel graph; returns true if it zoomed
    pub fn finish_zoom(&mut self, width: f64, now: f64) -> bool {
        let span = self.span;
        let domain = self.x_domain;
        let min_span = self.limits.min_span;
        match self.zoom.pointer_up(width, span, domain, now, min_span) {
            Some(domain) => {
                self.apply_zoom(domain);
                true
            }
            None => false,
        }
    }

    /// Switch namespace; cached series of every query are cleared
    pub fn set_namespace(&mut self, namespace: Option<String>, state: &mut QueryBrowserState) {
        state.delete_all_series();
        if namespace != self.options.namespace {
            self.options.namespace = namespace;
            self.mark_updating();
        }
    }

    /// Time until the next poll, or `None` if the graph should not poll
    pub fn poll_delay(&self, state: &QueryBrowserState) -> Option<Duration> {
        if self.end_time().is_some() || state.hide_graphs() {
            return None;
        }
        match state.poll() {
            PollSetting::Off => None,
            PollSetting::Fixed(ms) => Some(Duration::from_millis(ms)),
            PollSetting::Auto => Some(auto_poll_interval(&self.limits, self.span)),
        }
    }

    /// Cancel the in-flight cycle, if any
    pub fn cancel_current(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }

    /// Start a new poll cycle at wall-clock time `now`, superseding any running one
    pub fn begin_cycle(&mut self, state: &QueryBrowserState, now: f64) -> Option<PollCycle> {
        self.cancel_current();
        self.cycle_id += 1;

        if state.hide_graphs() {
            return None;
        }

        let queries_key = state.queries_key();
        if self.queries_key.as_ref() != Some(&queries_key) {
            self.queries_key = Some(queries_key);
            self.mark_updating();
        }

        // One `now` for every query so all series share the same X values
        let end_time = self.end_time().unwrap_or(now);
        let requests = state
            .runnable_queries()
            .into_iter()
            .map(|query| {
                query.map(|query| RangeQuery {
                    query,
                    timespan: self.span,
                    end_time,
                    samples: self.samples,
                    namespace: self.options.namespace.clone(),
                    timeout: self.options.timeout.clone(),
                })
            })
            .collect();

        let token = CancellationToken::new();
        self.current = Some(token.clone());

        Some(PollCycle {
            id: self.cycle_id,
            token,
            source: self.source.clone(),
            requests,
        })
    }

    fn keep_series(&self, labels: &PrometheusLabels) -> bool {
        match &self.options.filter_labels {
            Some(filter) => filter
                .iter()
                .all(|(k, v)| labels.get(k).map_or(true, |actual| actual == v)),
            None => true,
        }
    }

    /// Fold a finished cycle into the browser and the query state
    pub fn apply(&mut self, outcome: CycleOutcome, state: &mut QueryBrowserState) -> TickOutcome {
        if outcome.id != self.cycle_id {
            debug!(cycle = outcome.id, current = self.cycle_id, "Dropping superseded cycle");
            return TickOutcome::Stale;
        }
        self.current = None;

        let results = match outcome.results {
            Ok(results) => results,
            Err(Error::Cancelled) => return TickOutcome::Cancelled,
            Err(e) => {
                warn!("Query browser fetch failed: {}", e);
                self.error = Some(e.clone());
                self.updating = false;
                return TickOutcome::Failed(e);
            }
        };

        let num_data_points = count_data_points(
            results
                .iter()
                .flatten()
                .flatten()
                .map(|r| r.values.as_slice()),
        );
        crate::log_poll_cycle!(outcome.id, results.len(), num_data_points);

        let resolution = self.resolution();
        match resolution.adjust(self.samples, num_data_points) {
            SampleDecision::DatasetTooLarge => {
                warn!(data_points = num_data_points, "Dataset too large to graph");
                self.dataset_too_large = true;
                return TickOutcome::DatasetTooLarge;
            }
            SampleDecision::Resample(samples) => {
                info!(from = self.samples, to = samples, data_points = num_data_points, "Changing resolution");
                self.dataset_too_large = false;
                self.error = None;
                self.samples = samples;
                self.mark_updating();
                return TickOutcome::Resampled(samples);
            }
            SampleDecision::Keep => {}
        }

        self.dataset_too_large = false;
        let samples = self.samples;
        let span = self.span;

        let mut graph_data = Vec::with_capacity(results.len());
        for (index, result) in results.into_iter().enumerate() {
            let kept: Vec<PrometheusResult> = result
                .unwrap_or_default()
                .into_iter()
                .filter(|r| self.keep_series(&r.metric))
                .collect();

            let series_labels = state
                .query(index)
                .and_then(QueryObj::runnable)
                .map(|_| kept.iter().map(|r| r.metric.clone()).collect());
            state.patch_query(index, QueryPatch::series(series_labels));

            graph_data.push(
                kept.into_iter()
                    .map(|r| GraphSeries {
                        points: format_series_values(&r.values, samples, span),
                        labels: r.metric,
                    })
                    .collect(),
            );
        }

        self.graph_data = Some(graph_data);
        self.error = None;
        self.updating = false;

        TickOutcome::Rendered {
            data_points: num_data_points,
        }
    }

    /// One full poll: begin, run, apply
    pub async fn tick(&mut self, state: &mut QueryBrowserState, now: f64) -> TickOutcome {
        match self.begin_cycle(state, now) {
            Some(cycle) => {
                let outcome = cycle.run().await;
                self.apply(outcome, state)
            }
            None => TickOutcome::Skipped,
        }
    }

    /// Poll until the sample count settles, at most `max_rounds` times
    pub async fn refresh(&mut self, state: &mut QueryBrowserState, max_rounds: usize) -> TickOutcome {
        let mut outcome = TickOutcome::Skipped;
        for _ in 0..max_rounds.max(1) {
            outcome = self.tick(state, now_millis()).await;
            if !matches!(outcome, TickOutcome::Resampled(_)) {
                break;
            }
        }
        outcome
    }

    /// Apply a control change; returns true if the graph must be re-fetched
    pub fn handle_command(&mut self, command: BrowserCommand, state: &mut QueryBrowserState) -> bool {
        match command {
            BrowserCommand::SetSpan(span) => match self.set_span(span) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Ignoring span change: {}", e);
                    false
                }
            },
            BrowserCommand::ResetZoom => self.reset_zoom().is_ok(),
            BrowserCommand::Zoom(domain) => {
                self.apply_zoom(domain);
                true
            }
            BrowserCommand::SetNamespace(namespace) => {
                self.set_namespace(namespace, state);
                true
            }
            BrowserCommand::AddQuery(query) => {
                state.add_query(query);
                true
            }
            BrowserCommand::PatchQuery(index, patch) => state.patch_query(index, patch),
            // Visibility is applied when drawing
            BrowserCommand::ToggleSeries(index, labels) => {
                state.toggle_series(index, &labels);
                false
            }
            BrowserCommand::SetHideGraphs(hide) => {
                state.set_hide_graphs(hide);
                !hide
            }
            BrowserCommand::SetPoll(poll) => {
                state.set_poll(poll);
                false
            }
            BrowserCommand::Refresh => true,
        }
    }

    pub fn snapshot(&self, state: &QueryBrowserState) -> BrowserSnapshot {
        let stack = self
            .graph_data
            .as_ref()
            .map_or(self.options.is_stack, |data| {
                should_stack(self.options.is_stack, data, self.limits.max_stacks)
            });

        BrowserSnapshot {
            span: self.span,
            samples: self.samples,
            max_samples_for_span: self.resolution().max_samples_for_span(),
            x_domain: self.x_domain,
            graph_data: self.graph_data.clone(),
            error: self.error.clone(),
            dataset_too_large: self.dataset_too_large,
            updating: self.updating,
            is_stack: stack,
            hide_graphs: state.hide_graphs(),
            namespace: self.options.namespace.clone(),
            queries: state.queries().to_vec(),
        }
    }

    /// Drive the browser until the command channel closes.
    ///
    /// Polls on the span-derived cadence, applies commands as they arrive and
    /// publishes a snapshot after every change. The next poll is an absolute
    /// deadline, so commands that don't need a fetch leave the cadence alone.
    /// Returns the final query state.
    pub async fn run(
        mut self,
        mut state: QueryBrowserState,
        mut commands: mpsc::Receiver<BrowserCommand>,
        snapshots: watch::Sender<BrowserSnapshot>,
    ) -> QueryBrowserState {
        let mut in_flight: Option<BoxFuture<'static, CycleOutcome>> = None;
        let mut next_poll: Option<Instant> = None;
        let mut fetch_now = true;

        loop {
            if fetch_now {
                fetch_now = false;
                in_flight = self
                    .begin_cycle(&state, now_millis())
                    .map(|cycle| cycle.run().boxed());
                next_poll = if in_flight.is_some() {
                    None
                } else {
                    self.next_poll(&state)
                };
                snapshots.send_replace(self.snapshot(&state));
            }

            tokio::select! {
                outcome = wait_for_cycle(&mut in_flight) => {
                    in_flight = None;
                    if let TickOutcome::Resampled(_) = self.apply(outcome, &mut state) {
                        fetch_now = true;
                    } else {
                        next_poll = self.next_poll(&state);
                    }
                    snapshots.send_replace(self.snapshot(&state));
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        let reschedule = matches!(
                            command,
                            BrowserCommand::SetPoll(_) | BrowserCommand::SetHideGraphs(_)
                        );
                        if self.handle_command(command, &mut state) {
                            fetch_now = true;
                        } else if reschedule && in_flight.is_none() {
                            next_poll = self.next_poll(&state);
                        }
                        snapshots.send_replace(self.snapshot(&state));
                    }
                    None => break,
                },
                _ = sleep_until(next_poll) => {
                    fetch_now = true;
                }
            }
        }

        self.cancel_current();
        state
    }

    fn next_poll(&self, state: &QueryBrowserState) -> Option<Instant> {
        self.poll_delay(state).map(|delay| Instant::now() + delay)
    }
}

/// Poll cadence for `span` when polling is automatic
pub fn auto_poll_interval(limits: &SamplingLimits, span: f64) -> Duration {
    let ms = (span / POLL_SAMPLES_PER_SPAN).max(limits.min_poll_interval);
    Duration::from_millis(ms as u64)
}

async fn wait_for_cycle(cycle: &mut Option<BoxFuture<'static, CycleOutcome>>) -> CycleOutcome {
    match cycle {
        Some(cycle) => cycle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Wall-clock time in milliseconds
pub fn now_millis() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

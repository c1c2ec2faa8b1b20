///! Query commands: graph range queries once or continuously

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use console_common::{prometheus::format_labels, AxisDomain, GraphDataPoint, PrometheusLabels};
use console_monitoring::browser::{now_millis, BrowserSnapshot, BrowserView};
use console_monitoring::format::format_value;
use console_monitoring::{
    format_duration, parse_duration, parse_span, BrowserCommand, BrowserOptions, MonitoringConfig,
    PollSetting, PrometheusClient, QueryBrowser, QueryBrowserState, QueryPatch, TickOutcome,
    ZoomHandler, ZoomKey,
};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tabled::Tabled;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

/// Resolution changes allowed before a one-shot query gives up converging
const MAX_RESAMPLE_ROUNDS: usize = 5;

/// Widest legend column in table output
const LEGEND_WIDTH: usize = 48;

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query expressions; each one is a row of the graph
    #[arg(required = true)]
    pub queries: Vec<String>,

    /// Time span to graph, e.g. 30m or "1h 30m"
    #[arg(short, long)]
    pub span: Option<String>,

    /// End the window this long ago instead of now
    #[arg(long)]
    pub end: Option<String>,

    /// Namespace for tenancy-scoped queries
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Fixed samples per series instead of the span-derived maximum
    #[arg(long)]
    pub samples: Option<usize>,

    /// Stack series when there are few enough of them
    #[arg(long)]
    pub stack: bool,

    /// Drop series whose label differs, e.g. --filter job=api
    #[arg(long = "filter", value_parser = parse_label_filter)]
    pub filters: Vec<(String, String)>,

    /// Zoom to a column range of the graph, e.g. 10:30
    #[arg(long, value_parser = parse_column_range)]
    pub zoom: Option<(f64, f64)>,

    /// Graph width in columns
    #[arg(long, default_value_t = 60)]
    pub width: usize,

    /// Keep polling and accept commands on stdin
    #[arg(short, long)]
    pub watch: bool,
}

fn parse_label_filter(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected label=value, got '{}'", s)),
    }
}

fn parse_column_range(s: &str) -> Result<(f64, f64), String> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| format!("expected start:end, got '{}'", s))?;
    let a = a.trim().parse::<f64>().map_err(|e| e.to_string())?;
    let b = b.trim().parse::<f64>().map_err(|e| e.to_string())?;
    Ok((a, b))
}

pub async fn handle_query_command(
    args: QueryArgs,
    client: PrometheusClient,
    monitoring: &MonitoringConfig,
    namespace: Option<String>,
    output_format: &str,
) -> Result<()> {
    let format = OutputFormat::from_str(output_format);

    let mut options = BrowserOptions::from_config(monitoring);
    options.namespace = args.namespace.clone().or(namespace);
    options.default_samples = args.samples;
    options.is_stack = args.stack;
    if let Some(span) = &args.span {
        options.timespan = Some(parse_span(span).with_context(|| format!("Invalid span '{}'", span))?);
    }
    if !args.filters.is_empty() {
        options.filter_labels = Some(args.filters.iter().cloned().collect::<PrometheusLabels>());
    }

    let mut browser = QueryBrowser::new(Arc::new(client), monitoring.limits, options);
    let mut state = QueryBrowserState::with_queries(args.queries.iter().cloned(), monitoring.polling.poll);

    let now = now_millis();
    if let Some(end) = &args.end {
        let ago = parse_duration(end).with_context(|| format!("Invalid end offset '{}'", end))?;
        let to = now - ago;
        browser.apply_zoom(AxisDomain::new(to - browser.span(), to));
    }
    if let Some((start, end)) = args.zoom {
        let zoom = browser.zoom_handler();
        zoom.pointer_down(start);
        zoom.pointer_move(end);
        if !browser.finish_zoom(args.width as f64, now) {
            output::print_warning("Empty zoom range ignored");
        }
    }

    if args.watch {
        return watch_queries(browser, state, format, args.width).await;
    }

    let spinner = if format == OutputFormat::Table {
        Some(output::spinner("Querying..."))
    } else {
        None
    };
    let outcome = browser.refresh(&mut state, MAX_RESAMPLE_ROUNDS).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let snapshot = browser.snapshot(&state);
    render(&snapshot, format, args.width, false)?;

    match outcome {
        TickOutcome::Failed(e) if !e.is_range_vector() => Err(e).context("Query failed"),
        _ => Ok(()),
    }
}

/// One line typed while watching
#[derive(Debug, Clone, PartialEq)]
enum WatchInput {
    Command(BrowserCommand),
    Zoom(f64, f64),
    /// Start a selection at a column
    Mark(f64),
    /// Extend the selection to a column
    MoveTo(f64),
    /// Zoom to the selection
    Release,
    /// Drop the selection
    Escape,
    Toggle { query: usize, series: usize },
    Help,
    Quit,
}

const WATCH_HELP: &str = "\
Commands:
  span <duration>      show a different span, e.g. span 1h
  zoom <start> <end>   zoom to a column range of the graph
  mark <col>           start selecting a column range
  to <col>             extend the selection
  release              zoom to the selection
  esc                  drop the selection
  reset                back to the default span
  ns [name]            switch namespace, or clear it
  add <query>          add a query row
  enable <q>           run query q again
  disable <q>          stop running query q
  toggle <q> <n>       show or hide series n of query q
  poll <off|auto|d>    change the refresh interval
  hide | show          hide or show graphs
  refresh              poll now
  quit                 stop watching";

fn parse_index(word: Option<&str>, what: &str) -> Result<usize> {
    word.with_context(|| format!("missing {}", what))?
        .parse::<usize>()
        .with_context(|| format!("invalid {}", what))
}

fn parse_watch_input(line: &str) -> Result<Option<WatchInput>> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    let input = match word {
        "" => return Ok(None),
        "span" => WatchInput::Command(BrowserCommand::SetSpan(parse_span(rest)?)),
        "zoom" => {
            let start = args.next().context("missing start column")?.parse::<f64>()?;
            let end = args.next().context("missing end column")?.parse::<f64>()?;
            WatchInput::Zoom(start, end)
        }
        "mark" => WatchInput::Mark(args.next().context("missing column")?.parse::<f64>()?),
        "to" => WatchInput::MoveTo(args.next().context("missing column")?.parse::<f64>()?),
        "release" => WatchInput::Release,
        "esc" | "cancel" => WatchInput::Escape,
        "reset" => WatchInput::Command(BrowserCommand::ResetZoom),
        "ns" | "namespace" => {
            let namespace = Some(rest.to_string()).filter(|ns| !ns.is_empty());
            WatchInput::Command(BrowserCommand::SetNamespace(namespace))
        }
        "add" if !rest.is_empty() => WatchInput::Command(BrowserCommand::AddQuery(rest.to_string())),
        "enable" | "disable" => {
            let index = parse_index(args.next(), "query number")?;
            let patch = QueryPatch {
                is_enabled: Some(word == "enable"),
                ..Default::default()
            };
            WatchInput::Command(BrowserCommand::PatchQuery(index, patch))
        }
        "toggle" => WatchInput::Toggle {
            query: parse_index(args.next(), "query number")?,
            series: parse_index(args.next(), "series number")?,
        },
        "poll" => {
            let poll = match rest {
                "off" => PollSetting::Off,
                "auto" => PollSetting::Auto,
                interval => PollSetting::Fixed(parse_span(interval)? as u64),
            };
            WatchInput::Command(BrowserCommand::SetPoll(poll))
        }
        "hide" => WatchInput::Command(BrowserCommand::SetHideGraphs(true)),
        "show" => WatchInput::Command(BrowserCommand::SetHideGraphs(false)),
        "refresh" | "r" => WatchInput::Command(BrowserCommand::Refresh),
        "quit" | "q" | "exit" => WatchInput::Quit,
        "help" | "?" => WatchInput::Help,
        other => anyhow::bail!("unknown command '{}', type 'help'", other),
    };
    Ok(Some(input))
}

/// Release a drag on the frame on screen
fn release_zoom(zoom: &mut ZoomHandler, snapshot: &BrowserSnapshot, width: usize, min_span: f64) -> Result<BrowserCommand> {
    zoom.pointer_up(width as f64, snapshot.span, snapshot.x_domain, now_millis(), min_span)
        .map(BrowserCommand::Zoom)
        .context("empty zoom range")
}

/// Turn typed input into a browser command using the frame on screen.
///
/// Selection steps only move `zoom` and yield no command.
fn resolve_input(
    input: WatchInput,
    snapshot: &BrowserSnapshot,
    zoom: &mut ZoomHandler,
    width: usize,
    min_span: f64,
) -> Result<Option<BrowserCommand>> {
    let command = match input {
        WatchInput::Command(command) => command,
        WatchInput::Zoom(start, end) => {
            zoom.pointer_down(start);
            zoom.pointer_move(end);
            release_zoom(zoom, snapshot, width, min_span)?
        }
        WatchInput::Mark(column) => {
            zoom.pointer_down(column);
            return Ok(None);
        }
        WatchInput::MoveTo(column) => {
            if !zoom.is_zooming() {
                anyhow::bail!("nothing selected, use 'mark' first");
            }
            zoom.pointer_move(column);
            return Ok(None);
        }
        WatchInput::Release => {
            if !zoom.is_zooming() {
                anyhow::bail!("nothing selected, use 'mark' first");
            }
            release_zoom(zoom, snapshot, width, min_span)?
        }
        WatchInput::Escape => {
            if !zoom.key_down(ZoomKey::Escape) {
                anyhow::bail!("nothing selected");
            }
            return Ok(None);
        }
        WatchInput::Toggle { query, series } => {
            let labels = snapshot
                .queries
                .get(query)
                .and_then(|q| q.series.as_ref())
                .and_then(|series_list| series_list.get(series))
                .with_context(|| format!("no series {}.{}", query, series))?;
            BrowserCommand::ToggleSeries(query, labels.clone())
        }
        WatchInput::Help | WatchInput::Quit => anyhow::bail!("not a browser command"),
    };
    Ok(Some(command))
}

/// Marker line under the graph for a column selection
fn selection_bar(selection: (f64, f64), width: usize) -> String {
    let (left, span) = selection;
    let first = left.max(0.0) as usize;
    let last = ((left + span).max(0.0) as usize).min(width.saturating_sub(1));
    (0..width)
        .map(|column| if column >= first && column <= last { '^' } else { ' ' })
        .collect()
}

async fn watch_queries(
    browser: QueryBrowser,
    state: QueryBrowserState,
    format: OutputFormat,
    width: usize,
) -> Result<()> {
    let min_span = browser.limits().min_span;
    let initial = browser.snapshot(&state);
    let (tx, rx) = mpsc::channel(16);
    let (snap_tx, mut snap_rx) = watch::channel(initial);
    let handle = tokio::spawn(browser.run(state, rx, snap_tx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message: Option<String> = None;
    let mut zoom = ZoomHandler::new();

    loop {
        tokio::select! {
            changed = snap_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snap_rx.borrow_and_update().clone();
                redraw(&snapshot, format, width, &zoom, message.as_deref())?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                message = None;
                match parse_watch_input(&line) {
                    Ok(Some(WatchInput::Quit)) => break,
                    Ok(Some(WatchInput::Help)) => message = Some(WATCH_HELP.to_string()),
                    Ok(Some(input)) => {
                        let snapshot = snap_rx.borrow().clone();
                        match resolve_input(input, &snapshot, &mut zoom, width, min_span) {
                            Ok(Some(command)) => {
                                if tx.send(command).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => message = Some(e.to_string()),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => message = Some(e.to_string()),
                }
                let snapshot = snap_rx.borrow().clone();
                redraw(&snapshot, format, width, &zoom, message.as_deref())?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(tx);
    handle.await.context("Query browser task failed")?;
    Ok(())
}

fn redraw(
    snapshot: &BrowserSnapshot,
    format: OutputFormat,
    width: usize,
    zoom: &ZoomHandler,
    message: Option<&str>,
) -> Result<()> {
    if format == OutputFormat::Table {
        // Clear screen (ANSI escape code)
        print!("\x1B[2J\x1B[1;1H");
    }
    render(snapshot, format, width, true)?;
    if let Some(selection) = zoom.selection() {
        if format == OutputFormat::Table {
            println!("{}  {}", selection_bar(selection, width).cyan(), "'release' to zoom, 'esc' to cancel".dimmed());
        }
    }
    if let Some(message) = message {
        println!("{}", message);
    }
    if format == OutputFormat::Table {
        print!("> ");
    }
    std::io::stdout().flush()?;
    Ok(())
}

#[derive(Tabled, Serialize)]
struct SeriesRow {
    #[tabled(rename = "#")]
    index: String,
    series: String,
    last: String,
    graph: String,
}

#[derive(Serialize)]
struct SeriesReport<'a> {
    query: usize,
    legend: String,
    labels: &'a PrometheusLabels,
    visible: bool,
    points: &'a [GraphDataPoint],
}

#[derive(Serialize)]
struct QueryReport<'a> {
    status: &'static str,
    span: String,
    samples: usize,
    from: f64,
    to: f64,
    stacked: bool,
    namespace: Option<&'a str>,
    error: Option<String>,
    series: Vec<SeriesReport<'a>>,
}

fn view_status(view: BrowserView) -> &'static str {
    match view {
        BrowserView::Hidden => "hidden",
        BrowserView::RangeVector => "range_vector",
        BrowserView::DatasetTooLarge => "dataset_too_large",
        BrowserView::Empty { loaded: false } => "loading",
        BrowserView::Empty { loaded: true } => "empty",
        BrowserView::Graph => "graph",
    }
}

fn last_value(points: &[GraphDataPoint]) -> Option<f64> {
    points.iter().rev().find_map(|p| p.y)
}

fn value_range<'a, I: Iterator<Item = &'a GraphDataPoint>>(points: I) -> (f64, f64) {
    points
        .filter_map(|p| p.y)
        .fold(None, |range: Option<(f64, f64)>, y| match range {
            Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
            None => Some((y, y)),
        })
        .unwrap_or((0.0, 0.0))
}

/// Print one frame of the browser
fn render(snapshot: &BrowserSnapshot, format: OutputFormat, width: usize, show_error: bool) -> Result<()> {
    let now = now_millis();
    let disabled = snapshot.disabled_series();
    let model = snapshot.graph_model(&disabled, now);
    let domain = snapshot
        .x_domain
        .unwrap_or_else(|| AxisDomain::new(now - snapshot.span, now));

    if format != OutputFormat::Table {
        let series = model
            .as_ref()
            .map(|model| {
                model
                    .lines
                    .iter()
                    .map(|line| SeriesReport {
                        query: line.query_index,
                        legend: format_labels(line.labels),
                        labels: line.labels,
                        visible: line.series.is_some(),
                        points: line.series.map_or(&[][..], |s| s.points.as_slice()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let report = QueryReport {
            status: view_status(snapshot.view()),
            span: format_duration(snapshot.span),
            samples: snapshot.samples,
            from: domain.from,
            to: domain.to,
            stacked: snapshot.is_stack,
            namespace: snapshot.namespace.as_deref(),
            error: snapshot.error.as_ref().map(ToString::to_string),
            series,
        };
        return output::print_single(&report, format);
    }

    let mut header = format!(
        "{} {}   {} {}",
        "Span:".bold(),
        format_duration(snapshot.span),
        "Samples:".bold(),
        snapshot.samples
    );
    if let Some(namespace) = &snapshot.namespace {
        header.push_str(&format!("   {} {}", "Namespace:".bold(), namespace));
    }
    if snapshot.x_domain.is_some() {
        header.push_str(&format!("   {}", "(zoomed, type 'reset' to follow now)".dimmed()));
    }
    if snapshot.updating {
        header.push_str(&format!("   {}", "updating...".cyan()));
    }
    println!("{}", header);

    if show_error {
        if let Some(error) = snapshot.visible_error() {
            output::print_error(&error.to_string());
        }
    }

    match snapshot.view() {
        BrowserView::Hidden => output::print_info("Graphs hidden"),
        BrowserView::RangeVector => output::print_warning(
            "Ungraphable results: query results include range vectors, which cannot be graphed. \
             Try adding a function to transform the data.",
        ),
        BrowserView::DatasetTooLarge => output::print_warning(
            "Ungraphable results: the query result is too large to graph. \
             Try a shorter span or a more specific query.",
        ),
        BrowserView::Empty { loaded: false } => output::print_info("Loading..."),
        BrowserView::Empty { loaded: true } => output::print_info("No datapoints found"),
        BrowserView::Graph => {
            let Some(model) = model else { return Ok(()) };
            let visible = model.lines.iter().filter_map(|l| l.series);
            let y_range = model
                .y_domain
                .unwrap_or_else(|| value_range(visible.flat_map(|s| s.points.iter())));

            let mut per_query = vec![0usize; snapshot.queries.len()];
            let rows: Vec<SeriesRow> = model
                .lines
                .iter()
                .map(|line| {
                    let n = per_query.get(line.query_index).copied().unwrap_or(0);
                    if let Some(count) = per_query.get_mut(line.query_index) {
                        *count += 1;
                    }
                    let (last, graph) = match line.series {
                        Some(series) => (
                            last_value(&series.points).map(format_value).unwrap_or_default(),
                            output::sparkline(&series.points, model.x_domain, y_range, width),
                        ),
                        None => (String::new(), "(hidden)".dimmed().to_string()),
                    };
                    SeriesRow {
                        index: format!("{}.{}", line.query_index, n),
                        series: output::truncate(&format_labels(line.labels), LEGEND_WIDTH),
                        last,
                        graph,
                    }
                })
                .collect();

            output::print_table(rows);
            println!(
                "{:<w$}{}",
                model.format_x_tick(model.x_domain.from),
                model.format_x_tick(model.x_domain.to),
                w = width.saturating_sub(5)
            );
            println!(
                "Y: {} .. {}{}",
                model.format_y_tick(y_range.0),
                model.format_y_tick(y_range.1),
                if model.is_stack { "  (stacked)" } else { "" }
            );

            if snapshot.reduced_resolution() {
                output::print_warning(&format!(
                    "Showing {} of {} samples per series to keep the graph responsive",
                    snapshot.samples, snapshot.max_samples_for_span
                ));
            }
        }
    }

    Ok(())
}

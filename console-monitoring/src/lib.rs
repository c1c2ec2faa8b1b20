//! Metrics query browser
//!
//! Fetches range queries from the console's Prometheus proxy, keeps the number of
//! plotted points bounded and turns raw samples into gap-aware graph series.
//!
//! [`QueryBrowser`] is the entry point. Feed it a [`QueryBrowserState`], either
//! one poll at a time with [`QueryBrowser::tick`] or continuously with
//! [`QueryBrowser::run`].

pub mod browser;
pub mod client;
pub mod config;
pub mod duration;
pub mod format;
pub mod graph;
pub mod logging;
pub mod resolution;
pub mod state;
pub mod zoom;

pub use browser::{
    BrowserCommand, BrowserOptions, BrowserSnapshot, BrowserView, QueryBrowser, TickOutcome,
};
pub use client::{MetricsSource, PrometheusClient, RangeQuery};
pub use config::{ConfigError, MonitoringConfig, PollSetting, SamplingLimits};
pub use duration::{format_duration, parse_duration, parse_span};
pub use graph::GraphModel;
pub use logging::LoggingConfig;
pub use state::{QueryBrowserState, QueryPatch};
pub use zoom::{ZoomHandler, ZoomKey};

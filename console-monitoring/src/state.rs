//! Query browser UI state
//!
//! The query list and display flags, owned by whoever drives the browser and
//! handed to it by reference. All reads and writes go through these methods.

use console_common::{PrometheusLabels, QueryObj};
use serde::{Deserialize, Serialize};

use crate::config::PollSetting;

/// Partial update for one query row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPatch {
    pub query: Option<String>,
    pub is_enabled: Option<bool>,
    pub is_expanded: Option<bool>,
    /// `Some(None)` clears the cached series
    pub series: Option<Option<Vec<PrometheusLabels>>>,
}

impl QueryPatch {
    pub fn series(series: Option<Vec<PrometheusLabels>>) -> Self {
        Self {
            series: Some(series),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryBrowserState {
    queries: Vec<QueryObj>,
    hide_graphs: bool,
    poll: PollSetting,
}

impl QueryBrowserState {
    pub fn new(poll: PollSetting) -> Self {
        Self {
            queries: Vec::new(),
            hide_graphs: false,
            poll,
        }
    }

    /// State with one enabled row per query text
    pub fn with_queries<I, S>(queries: I, poll: PollSetting) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::new(poll);
        for query in queries {
            state.add_query(query);
        }
        state
    }

    pub fn queries(&self) -> &[QueryObj] {
        &self.queries
    }

    pub fn query(&self, index: usize) -> Option<&QueryObj> {
        self.queries.get(index)
    }

    /// Append a row and return its index
    pub fn add_query(&mut self, query: impl Into<String>) -> usize {
        self.queries.push(QueryObj::new(query));
        self.queries.len() - 1
    }

    pub fn remove_query(&mut self, index: usize) -> Option<QueryObj> {
        (index < self.queries.len()).then(|| self.queries.remove(index))
    }

    /// Apply a patch by index; returns false if there is no such row
    pub fn patch_query(&mut self, index: usize, patch: QueryPatch) -> bool {
        let Some(query) = self.queries.get_mut(index) else {
            return false;
        };

        if let Some(text) = patch.query {
            if text != query.query {
                // Series of the old expression no longer apply
                query.disabled_series.clear();
            }
            query.query = text;
        }
        if let Some(enabled) = patch.is_enabled {
            query.is_enabled = enabled;
        }
        if let Some(expanded) = patch.is_expanded {
            query.is_expanded = expanded;
        }
        if let Some(series) = patch.series {
            query.series = series;
        }
        true
    }

    /// Clear every query's cached series, e.g. after a namespace change
    pub fn delete_all_series(&mut self) {
        for query in &mut self.queries {
            query.series = None;
        }
    }

    /// Show or hide one series of a query; returns the new visibility
    pub fn toggle_series(&mut self, index: usize, labels: &PrometheusLabels) -> Option<bool> {
        let query = self.queries.get_mut(index)?;
        if let Some(pos) = query.disabled_series.iter().position(|l| l == labels) {
            query.disabled_series.remove(pos);
            Some(true)
        } else {
            query.disabled_series.push(labels.clone());
            Some(false)
        }
    }

    /// Query text to run for each row, `None` for rows that don't run
    pub fn runnable_queries(&self) -> Vec<Option<String>> {
        self.queries
            .iter()
            .map(|q| q.runnable().map(str::to_string))
            .collect()
    }

    /// Dependency key: changes whenever the set of queries to run changes
    pub fn queries_key(&self) -> String {
        self.queries
            .iter()
            .filter_map(QueryObj::runnable)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn disabled_series(&self) -> Vec<Vec<PrometheusLabels>> {
        self.queries.iter().map(|q| q.disabled_series.clone()).collect()
    }

    pub fn hide_graphs(&self) -> bool {
        self.hide_graphs
    }

    pub fn set_hide_graphs(&mut self, hide: bool) {
        self.hide_graphs = hide;
    }

    pub fn poll(&self) -> PollSetting {
        self.poll
    }

    pub fn set_poll(&mut self, poll: PollSetting) {
        self.poll = poll;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(job: &str) -> PrometheusLabels {
        let mut labels = PrometheusLabels::new();
        labels.insert("job".to_string(), job.to_string());
        labels
    }

    #[test]
    fn test_add_and_patch() {
        let mut state = QueryBrowserState::new(PollSetting::Auto);
        let index = state.add_query("up");
        assert_eq!(index, 0);

        assert!(state.patch_query(0, QueryPatch::series(Some(vec![labels("a")]))));
        assert_eq!(state.query(0).unwrap().series.as_ref().unwrap().len(), 1);

        assert!(state.patch_query(
            0,
            QueryPatch {
                is_enabled: Some(false),
                ..Default::default()
            }
        ));
        assert!(!state.query(0).unwrap().is_enabled);
        // Untouched fields survive
        assert!(state.query(0).unwrap().series.is_some());

        assert!(!state.patch_query(7, QueryPatch::default()));
    }

    #[test]
    fn test_delete_all_series() {
        let mut state = QueryBrowserState::with_queries(["up", "down"], PollSetting::Auto);
        state.patch_query(0, QueryPatch::series(Some(vec![labels("a")])));
        state.patch_query(1, QueryPatch::series(Some(vec![labels("b")])));

        state.delete_all_series();
        assert!(state.queries().iter().all(|q| q.series.is_none()));
    }

    #[test]
    fn test_toggle_series() {
        let mut state = QueryBrowserState::with_queries(["up"], PollSetting::Auto);
        assert_eq!(state.toggle_series(0, &labels("a")), Some(false));
        assert_eq!(state.disabled_series(), vec![vec![labels("a")]]);
        assert_eq!(state.toggle_series(0, &labels("a")), Some(true));
        assert!(state.disabled_series()[0].is_empty());
        assert_eq!(state.toggle_series(3, &labels("a")), None);
    }

    #[test]
    fn test_changing_text_resets_disabled_series() {
        let mut state = QueryBrowserState::with_queries(["up"], PollSetting::Auto);
        state.toggle_series(0, &labels("a"));
        state.patch_query(
            0,
            QueryPatch {
                query: Some("rate(x[5m])".to_string()),
                ..Default::default()
            },
        );
        assert!(state.query(0).unwrap().disabled_series.is_empty());
    }

    #[test]
    fn test_runnable_queries_and_key() {
        let mut state = QueryBrowserState::with_queries(["up", "", "rate(x[5m])"], PollSetting::Auto);
        state.patch_query(
            2,
            QueryPatch {
                is_enabled: Some(false),
                ..Default::default()
            },
        );
        assert_eq!(state.runnable_queries(), vec![Some("up".to_string()), None, None]);
        assert_eq!(state.queries_key(), "up");
    }

    #[test]
    fn test_remove_query() {
        let mut state = QueryBrowserState::with_queries(["a", "b"], PollSetting::Off);
        assert_eq!(state.remove_query(0).unwrap().query, "a");
        assert!(state.remove_query(5).is_none());
        assert_eq!(state.queries().len(), 1);
        assert_eq!(state.poll(), PollSetting::Off);
    }
}

//! Prometheus-compatible metrics endpoint

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::state::AppState;

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Server start time
    start_time: Instant,
    /// Total HTTP requests
    request_count: RwLock<u64>,
    /// Transcodes that reached the pipeline
    transcodes_started: RwLock<u64>,
    /// Transcodes whose response was handed to the client
    transcodes_completed: RwLock<u64>,
    /// Failed requests by error category
    failures_by_category: RwLock<BTreeMap<&'static str, u64>>,
    /// Requests aborted by disconnect, shutdown or timeout
    cancelled: RwLock<u64>,
    /// Total artifact bytes handed to clients
    bytes_delivered: RwLock<u64>,
    /// Pipelines currently running
    active_transcodes: RwLock<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            request_count: RwLock::new(0),
            transcodes_started: RwLock::new(0),
            transcodes_completed: RwLock::new(0),
            failures_by_category: RwLock::new(BTreeMap::new()),
            cancelled: RwLock::new(0),
            bytes_delivered: RwLock::new(0),
            active_transcodes: RwLock::new(0),
        }
    }

    pub fn record_request(&self) {
        *self.request_count.write() += 1;
    }

    /// Count a pipeline as running until the returned guard is dropped
    pub fn start_transcode(&self) -> ActiveTranscode<'_> {
        *self.transcodes_started.write() += 1;
        *self.active_transcodes.write() += 1;
        ActiveTranscode { metrics: self }
    }

    pub fn record_completed(&self) {
        *self.transcodes_completed.write() += 1;
    }

    /// Count an artifact streamed to the client in full
    pub fn record_delivered(&self, bytes: u64) {
        *self.bytes_delivered.write() += bytes;
    }

    pub fn record_failure(&self, category: &'static str) {
        *self.failures_by_category.write().entry(category).or_insert(0) += 1;
    }

    pub fn record_cancelled(&self) {
        *self.cancelled.write() += 1;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn requests(&self) -> u64 {
        *self.request_count.read()
    }

    pub fn completed(&self) -> u64 {
        *self.transcodes_completed.read()
    }

    pub fn cancelled(&self) -> u64 {
        *self.cancelled.read()
    }

    pub fn failures(&self, category: &str) -> u64 {
        self.failures_by_category
            .read()
            .get(category)
            .copied()
            .unwrap_or(0)
    }

    pub fn bytes_delivered(&self) -> u64 {
        *self.bytes_delivered.read()
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        push_metric(
            &mut output,
            "transcoder_uptime_seconds",
            "Server uptime in seconds",
            "counter",
            self.uptime_secs(),
        );
        push_metric(
            &mut output,
            "transcoder_requests_total",
            "Total number of HTTP requests",
            "counter",
            self.requests(),
        );
        push_metric(
            &mut output,
            "transcoder_transcodes_started_total",
            "Transcodes handed to the pipeline",
            "counter",
            *self.transcodes_started.read(),
        );
        push_metric(
            &mut output,
            "transcoder_transcodes_completed_total",
            "Transcodes delivered to the client",
            "counter",
            self.completed(),
        );
        push_metric(
            &mut output,
            "transcoder_transcodes_active",
            "Pipelines currently running",
            "gauge",
            *self.active_transcodes.read(),
        );
        push_metric(
            &mut output,
            "transcoder_cancelled_total",
            "Requests cancelled by disconnect, shutdown or timeout",
            "counter",
            self.cancelled(),
        );
        push_metric(
            &mut output,
            "transcoder_bytes_delivered_total",
            "Total artifact bytes delivered",
            "counter",
            self.bytes_delivered(),
        );

        output.push_str("# HELP transcoder_failures_total Failed requests by error category\n");
        output.push_str("# TYPE transcoder_failures_total counter\n");
        for (category, count) in self.failures_by_category.read().iter() {
            output.push_str(&format!(
                "transcoder_failures_total{{category=\"{}\"}} {}\n",
                category, count
            ));
        }

        output
    }
}

/// Keeps the active transcode gauge raised while alive
pub struct ActiveTranscode<'a> {
    metrics: &'a Metrics,
}

impl Drop for ActiveTranscode<'_> {
    fn drop(&mut self) {
        let mut active = self.metrics.active_transcodes.write();
        *active = active.saturating_sub(1);
    }
}

fn push_metric(output: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    output.push_str(&format!("# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} {}\n", name, kind));
    output.push_str(&format!("{} {}\n\n", name, value));
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let body = state.metrics.export_prometheus();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

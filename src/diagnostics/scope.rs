//! Per-request diagnostic state.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

/// Mutable diagnostic state for one in-flight request.
///
/// Owned by the request's call chain and passed by `&mut` into every hook, so
/// it is never shared between requests and needs no locking. Timestamps are
/// supplied by the caller's [`Clock`](super::Clock).
#[derive(Debug, Clone)]
pub struct RequestScope {
    request_id: Uuid,
    url: String,
    start_time: Instant,
    throw_on_violation: bool,
    query_count: u64,
    max_query_count: u64,
    max_single_query_seconds: f64,
    max_total_query_seconds: f64,
    total_query_time: Duration,
    total_time_exceeded: bool,
    dump_depth: u32,
    dump_count: u64,
    dump_requested: u64,
    pending_query_start: Option<Instant>,
}

impl RequestScope {
    /// Create a scope for a request arriving at `url`.
    pub fn new(url: impl Into<String>, config: &DiagnosticsConfig, now: Instant) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            url: url.into(),
            start_time: now,
            throw_on_violation: config.throw_on_violation,
            query_count: 0,
            max_query_count: config.max_query_count,
            max_single_query_seconds: config.max_single_query_seconds,
            max_total_query_seconds: config.max_total_query_seconds,
            total_query_time: Duration::ZERO,
            total_time_exceeded: false,
            dump_depth: 0,
            dump_count: 0,
            dump_requested: 0,
            pending_query_start: None,
        }
    }

    /// Reset every counter and budget to the configured defaults.
    ///
    /// The request id and URL are kept, so calling this repeatedly before any
    /// query runs has no further effect beyond moving the start time.
    pub fn begin(&mut self, config: &DiagnosticsConfig, now: Instant) {
        let request_id = self.request_id;
        let url = std::mem::take(&mut self.url);
        *self = Self::new(url, config, now);
        self.request_id = request_id;
    }

    /// Point the scope at a new request.
    pub(crate) fn rebind(&mut self, url: &str) {
        self.request_id = Uuid::new_v4();
        self.url = url.to_string();
    }

    /// Mark the start of a query.
    ///
    /// A second call without an intervening [`record_query_end`] replaces the
    /// pending start.
    ///
    /// [`record_query_end`]: RequestScope::record_query_end
    pub fn record_query_start(&mut self, now: Instant) {
        self.pending_query_start = Some(now);
    }

    /// Account for a completed query and return how long it took.
    ///
    /// A query with no recorded start counts with a zero duration.
    pub fn record_query_end(&mut self, now: Instant) -> Duration {
        let duration = self
            .pending_query_start
            .take()
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or(Duration::ZERO);

        self.query_count += 1;
        self.total_query_time += duration;
        duration
    }

    /// Snapshot the request's statistics for reporting.
    pub fn end(&self, now: Instant) -> RequestSummary {
        RequestSummary {
            request_id: self.request_id,
            url: self.url.clone(),
            total_elapsed_secs: now.saturating_duration_since(self.start_time).as_secs_f64(),
            query_count: self.query_count,
            total_query_secs: self.total_query_time.as_secs_f64(),
            exceeded_max: self.query_count >= self.max_query_count,
            dumps_emitted: self.dump_count,
            dumps_requested: self.dump_requested,
        }
    }

    /// Open one level of verbose query logging.
    pub fn enter_dump(&mut self) {
        self.dump_depth += 1;
    }

    /// Close one level of verbose query logging.
    ///
    /// Returns `false` without changing the depth when no level is open.
    pub fn exit_dump(&mut self) -> bool {
        match self.dump_depth.checked_sub(1) {
            Some(depth) => {
                self.dump_depth = depth;
                true
            }
            None => false,
        }
    }

    /// Whether verbose per-query logging is enabled.
    pub fn is_dumping(&self) -> bool {
        self.dump_depth > 0
    }

    /// Flag the total-time budget as exceeded.
    ///
    /// Returns `true` only the first time it is called for this request.
    pub(crate) fn mark_total_time_exceeded(&mut self) -> bool {
        !std::mem::replace(&mut self.total_time_exceeded, true)
    }

    pub(crate) fn note_dump_requested(&mut self) {
        self.dump_requested += 1;
    }

    pub(crate) fn note_dump_emitted(&mut self) {
        self.dump_count += 1;
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    pub fn total_query_time(&self) -> Duration {
        self.total_query_time
    }

    pub fn total_time_exceeded(&self) -> bool {
        self.total_time_exceeded
    }

    pub fn dump_depth(&self) -> u32 {
        self.dump_depth
    }

    pub fn dump_count(&self) -> u64 {
        self.dump_count
    }

    pub fn dump_requested(&self) -> u64 {
        self.dump_requested
    }

    pub fn max_query_count(&self) -> u64 {
        self.max_query_count
    }

    pub fn max_single_query_seconds(&self) -> f64 {
        self.max_single_query_seconds
    }

    pub fn max_total_query_seconds(&self) -> f64 {
        self.max_total_query_seconds
    }

    pub fn throw_on_violation(&self) -> bool {
        self.throw_on_violation
    }

    /// Override the query-count budget for this request only.
    pub fn set_max_query_count(&mut self, max: u64) {
        self.max_query_count = max;
    }

    /// Override the single-query budget for this request only.
    pub fn set_max_single_query_seconds(&mut self, secs: f64) {
        self.max_single_query_seconds = secs;
    }

    /// Override the total query time budget for this request only.
    pub fn set_max_total_query_seconds(&mut self, secs: f64) {
        self.max_total_query_seconds = secs;
    }

    /// Switch strict mode on or off for this request only.
    pub fn set_throw_on_violation(&mut self, throw: bool) {
        self.throw_on_violation = throw;
    }
}

/// Statistics reported when a request ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSummary {
    pub request_id: Uuid,
    pub url: String,
    pub total_elapsed_secs: f64,
    pub query_count: u64,
    pub total_query_secs: f64,
    /// Whether the request reached its query-count budget
    pub exceeded_max: bool,
    pub dumps_emitted: u64,
    pub dumps_requested: u64,
}

impl fmt::Display for RequestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total time: {:.3}, query_count: {}{}, stacks_dumped: {}, stacks_requested: {}",
            self.total_elapsed_secs,
            self.query_count,
            if self.exceeded_max { " (exceeded max)" } else { "" },
            self.dumps_emitted,
            self.dumps_requested
        )
    }
}

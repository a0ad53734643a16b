//! Request lifecycle around a [`RequestScope`].

use std::ops::{Deref, DerefMut};
use tracing::debug;

use super::hooks::QueryDiagnostics;
use super::scope::{RequestScope, RequestSummary};

impl QueryDiagnostics {
    /// Start a request, creating its scope in `slot` if none exists yet.
    ///
    /// An existing scope is reset, so calling this twice before any query
    /// runs leaves the same state as calling it once. A reused slot started
    /// for a different URL gets that URL and a new request id.
    pub fn begin_request<'s>(
        &self,
        slot: &'s mut Option<RequestScope>,
        url: &str,
    ) -> &'s mut RequestScope {
        let now = self.clock().now();
        let scope = slot.get_or_insert_with(|| RequestScope::new(url, self.config(), now));
        if scope.url() != url {
            scope.rebind(url);
        }
        scope.begin(self.config(), now);
        scope
    }

    /// End the request held in `slot`, log its summary and discard the scope.
    ///
    /// Returns `None` when no request was started.
    pub fn end_request(&self, slot: &mut Option<RequestScope>) -> Option<RequestSummary> {
        slot.take().map(|scope| self.report(&scope))
    }

    /// Start a request whose scope is owned by the returned guard.
    pub fn request(&self, url: impl Into<String>) -> RequestGuard<'_> {
        RequestGuard {
            diagnostics: self,
            scope: self.new_scope(url),
            finished: false,
        }
    }

    fn report(&self, scope: &RequestScope) -> RequestSummary {
        let summary = scope.end(self.clock().now());
        debug!(
            request_id = %summary.request_id,
            url = %summary.url,
            total_elapsed_secs = summary.total_elapsed_secs,
            query_count = summary.query_count,
            exceeded_max = summary.exceeded_max,
            dumps_emitted = summary.dumps_emitted,
            dumps_requested = summary.dumps_requested,
            "{}",
            summary
        );
        summary
    }
}

/// Owns a request's scope and reports it exactly once.
///
/// Call [`finish`](RequestGuard::finish) to get the summary. A guard dropped
/// without finishing (handler error, client disconnect, cancelled task) still
/// logs its summary.
pub struct RequestGuard<'a> {
    diagnostics: &'a QueryDiagnostics,
    scope: RequestScope,
    finished: bool,
}

impl RequestGuard<'_> {
    /// End the request and return its summary.
    pub fn finish(mut self) -> RequestSummary {
        self.finished = true;
        self.diagnostics.report(&self.scope)
    }
}

impl Deref for RequestGuard<'_> {
    type Target = RequestScope;

    fn deref(&self) -> &RequestScope {
        &self.scope
    }
}

impl DerefMut for RequestGuard<'_> {
    fn deref_mut(&mut self) -> &mut RequestScope {
        &mut self.scope
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.diagnostics.report(&self.scope);
        }
    }
}

//! Query execution hooks.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::detector;
use super::limiter::{DumpOutcome, DumpRateLimiter};
use super::scope::RequestScope;
use crate::config::DiagnosticsConfig;
use crate::error::DiagnosticError;

/// Entry point for query diagnostics.
///
/// One instance is created at startup and shared by every request. It owns the
/// read-only configuration and the process-wide dump limiter. Per-request
/// state is never stored here; callers pass their [`RequestScope`] into each
/// hook, or `None` when running outside a request (startup migrations,
/// background jobs), in which case the hooks do nothing.
pub struct QueryDiagnostics {
    config: DiagnosticsConfig,
    clock: Arc<dyn Clock>,
    limiter: DumpRateLimiter,
}

impl QueryDiagnostics {
    /// Create diagnostics timed by the system clock.
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create diagnostics timed by a custom clock.
    pub fn with_clock(config: DiagnosticsConfig, clock: Arc<dyn Clock>) -> Self {
        let limiter = DumpRateLimiter::new(&config, clock.unix_second());
        Self {
            config,
            clock,
            limiter,
        }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn limiter(&self) -> &DumpRateLimiter {
        &self.limiter
    }

    /// Create a fresh scope for a request arriving at `url`.
    pub fn new_scope(&self, url: impl Into<String>) -> RequestScope {
        RequestScope::new(url, &self.config, self.clock.now())
    }

    /// Hook fired immediately before a statement runs.
    pub fn before_execute(
        &self,
        scope: Option<&mut RequestScope>,
        statement: &str,
        parameters: &dyn fmt::Debug,
    ) {
        let Some(scope) = scope else {
            return;
        };

        scope.record_query_start(self.clock.now());
        if scope.is_dumping() {
            debug!(
                request_id = %scope.request_id(),
                "Executing query: {}, params: {:?}",
                statement,
                parameters
            );
        }
    }

    /// Hook fired immediately after a statement completes successfully.
    ///
    /// Accounts for the query, checks the budgets and dumps on a violation.
    /// Only fails in strict mode, with the diagnostic for the violation.
    pub fn after_execute(
        &self,
        scope: Option<&mut RequestScope>,
        statement: &str,
        parameters: &dyn fmt::Debug,
    ) -> Result<(), DiagnosticError> {
        let Some(scope) = scope else {
            return Ok(());
        };

        let duration = scope.record_query_end(self.clock.now());

        let result = match detector::evaluate(scope, duration) {
            Some(violation) => {
                let message = violation.message(statement, parameters);
                self.maybe_dump(Some(&mut *scope), &message).map(|_| ())
            }
            None => Ok(()),
        };

        if scope.is_dumping() {
            debug!(
                request_id = %scope.request_id(),
                "Query finished in {:.6} seconds.",
                duration.as_secs_f64()
            );
        }

        result
    }

    /// Dump the stack for `message`, subject to the per-request and global
    /// caps.
    pub fn maybe_dump(
        &self,
        scope: Option<&mut RequestScope>,
        message: &str,
    ) -> Result<DumpOutcome, DiagnosticError> {
        self.limiter
            .maybe_dump(scope, self.clock.unix_second(), message)
    }

    /// Open one level of verbose query logging on `scope`.
    pub fn enter_dump(&self, scope: &mut RequestScope) {
        scope.enter_dump();
    }

    /// Close one level of verbose query logging on `scope`.
    ///
    /// An exit with no matching enter leaves the depth at zero and is reported
    /// through the dump limiter. It never fails the caller, even in strict
    /// mode. Returns whether the exit was balanced.
    pub fn exit_dump(&self, scope: &mut RequestScope) -> bool {
        if scope.exit_dump() {
            return true;
        }

        if let Err(e) = self.maybe_dump(
            Some(&mut *scope),
            "query dump scope exited without matching enter",
        ) {
            warn!(
                request_id = %scope.request_id(),
                error = %e,
                "Unbalanced query dump scope"
            );
        }
        false
    }
}

impl fmt::Debug for QueryDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDiagnostics")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .finish()
    }
}

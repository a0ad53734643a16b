//! Rate limiting for diagnostic stack dumps.
//!
//! Dumps are capped twice: per request, and per wall-clock second across the
//! whole process. The per-request counters live on the [`RequestScope`]; the
//! global window is the only state shared between requests and sits behind a
//! mutex.

use parking_lot::Mutex;
use std::backtrace::Backtrace;
use tracing::{error, trace};

use super::scope::RequestScope;
use crate::config::DiagnosticsConfig;
use crate::error::DiagnosticError;

/// URL reported for dumps raised outside of any request.
const NO_REQUEST_URL: &str = "<no request>";

/// What the limiter did with a dump request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpOutcome {
    /// The dump was logged
    Emitted,
    /// The request already used its dump allowance
    RequestCapReached,
    /// The process already used its dump allowance for this second
    GlobalCapReached,
}

/// Process-wide dump window.
#[derive(Debug)]
struct GlobalLimiterState {
    /// Coarse wall-clock second of the current window
    last_dump_second: i64,
    /// Dumps admitted during `last_dump_second`
    dumps_this_second: u64,
}

/// Gatekeeper for diagnostic stack dumps.
///
/// Created once per process alongside the configuration and shared by every
/// request for the lifetime of the process.
#[derive(Debug)]
pub struct DumpRateLimiter {
    max_request_dumps: u64,
    max_global_dumps_per_second: u64,
    throw_on_violation: bool,
    state: Mutex<GlobalLimiterState>,
}

impl DumpRateLimiter {
    /// Create a limiter whose first window starts at `now_second`.
    pub fn new(config: &DiagnosticsConfig, now_second: i64) -> Self {
        Self {
            max_request_dumps: config.max_request_dumps,
            max_global_dumps_per_second: config.max_global_dumps_per_second,
            throw_on_violation: config.throw_on_violation,
            state: Mutex::new(GlobalLimiterState {
                last_dump_second: now_second,
                dumps_this_second: 0,
            }),
        }
    }

    /// Decide whether a dump may be emitted, updating both caps.
    ///
    /// Every call counts as a requested dump on the scope; only admitted
    /// dumps count against the caps.
    pub fn admit(&self, mut scope: Option<&mut RequestScope>, now_second: i64) -> DumpOutcome {
        if let Some(scope) = scope.as_deref_mut() {
            scope.note_dump_requested();
            if scope.dump_count() >= self.max_request_dumps {
                trace!(
                    request_id = %scope.request_id(),
                    dumps = scope.dump_count(),
                    "Per-request dump cap reached"
                );
                return DumpOutcome::RequestCapReached;
            }
        }

        {
            let mut state = self.state.lock();
            if state.last_dump_second != now_second {
                state.last_dump_second = now_second;
                state.dumps_this_second = 0;
            }
            if state.dumps_this_second >= self.max_global_dumps_per_second {
                trace!(
                    second = now_second,
                    dumps = state.dumps_this_second,
                    "Global dump cap reached"
                );
                return DumpOutcome::GlobalCapReached;
            }
            state.dumps_this_second += 1;
        }

        if let Some(scope) = scope {
            scope.note_dump_emitted();
        }
        DumpOutcome::Emitted
    }

    /// Dump the current stack for `message`, subject to both caps.
    ///
    /// In strict mode an admitted dump is returned as an error instead of
    /// being logged, and the caller is expected to fail the request with it.
    pub fn maybe_dump(
        &self,
        mut scope: Option<&mut RequestScope>,
        now_second: i64,
        message: &str,
    ) -> Result<DumpOutcome, DiagnosticError> {
        let outcome = self.admit(scope.as_deref_mut(), now_second);
        if outcome != DumpOutcome::Emitted {
            return Ok(outcome);
        }

        let throw = scope
            .as_deref()
            .map_or(self.throw_on_violation, RequestScope::throw_on_violation);
        let url = scope.as_deref().map_or(NO_REQUEST_URL, RequestScope::url);

        if throw {
            return Err(DiagnosticError {
                url: url.to_string(),
                message: message.to_string(),
            });
        }

        let stack = Backtrace::force_capture();
        match scope.as_deref() {
            Some(scope) => error!(
                request_id = %scope.request_id(),
                url = %url,
                stack = %stack,
                "{}",
                message
            ),
            None => error!(url = %url, stack = %stack, "{}", message),
        }
        Ok(outcome)
    }

    /// Number of dumps admitted in the current global window.
    pub fn global_dumps_this_second(&self) -> u64 {
        self.state.lock().dumps_this_second
    }
}

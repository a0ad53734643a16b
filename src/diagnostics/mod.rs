//! Per-request query diagnostics.
//!
//! Every query is timed through the before/after hooks on
//! [`QueryDiagnostics`]. After each query the budgets are checked and a
//! violation produces a stack dump, rate limited per request and per second
//! across the process.

mod clock;
mod detector;
mod dump_scope;
mod executor;
mod hooks;
mod limiter;
mod request;
mod scope;

pub use clock::{Clock, ManualClock, SystemClock};
pub use detector::{evaluate, Violation};
pub use dump_scope::QueryDumpGuard;
pub use executor::{InstrumentedExecutor, QueryExecutor};
pub use hooks::QueryDiagnostics;
pub use limiter::{DumpOutcome, DumpRateLimiter};
pub use request::RequestGuard;
pub use scope::{RequestScope, RequestSummary};

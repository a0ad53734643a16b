//! Threshold checks run after every completed query.

use std::fmt;
use std::time::Duration;

use super::scope::RequestScope;

/// A query budget crossed by the current request.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// All queries of the request together ran past the total budget
    TotalTime { total: Duration, budget_secs: f64 },
    /// The query that just finished ran past the single-query budget
    SingleQuery { duration: Duration, budget_secs: f64 },
    /// The request issued exactly its maximum number of queries
    QueryCount { count: u64 },
}

impl Violation {
    /// Build the dump message for this violation and its triggering query.
    pub fn message(&self, statement: &str, parameters: &dyn fmt::Debug) -> String {
        match self {
            Violation::TotalTime { total, budget_secs } => format!(
                "total query time exceeded for request, triggering statement: {}, params: {:?} ({:.3}s > {:.3}s)",
                statement,
                parameters,
                total.as_secs_f64(),
                budget_secs
            ),
            Violation::SingleQuery {
                duration,
                budget_secs,
            } => format!(
                "single query time exceeded ({:.3}s > {:.3}s), statement: {}, params: {:?}",
                duration.as_secs_f64(),
                budget_secs,
                statement,
                parameters
            ),
            Violation::QueryCount { count } => format!(
                "max queries per request exceeded ({}), last statement: {}, params: {:?}",
                count, statement, parameters
            ),
        }
    }
}

/// Evaluate the budgets for the query that just completed.
///
/// Checks run in a fixed order and stop at the first match, so a query
/// produces at most one violation. The total-time check is sticky and only
/// ever fires once per request; the count check fires on equality only.
pub fn evaluate(scope: &mut RequestScope, duration: Duration) -> Option<Violation> {
    let total = scope.total_query_time();
    if total.as_secs_f64() > scope.max_total_query_seconds() && scope.mark_total_time_exceeded() {
        return Some(Violation::TotalTime {
            total,
            budget_secs: scope.max_total_query_seconds(),
        });
    }

    if duration.as_secs_f64() > scope.max_single_query_seconds() {
        return Some(Violation::SingleQuery {
            duration,
            budget_secs: scope.max_single_query_seconds(),
        });
    }

    if scope.query_count() == scope.max_query_count() {
        return Some(Violation::QueryCount {
            count: scope.query_count(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticsConfig;
    use std::time::Instant;

    fn run_query(scope: &mut RequestScope, start: Instant, millis: u64) -> Option<Violation> {
        scope.record_query_start(start);
        let duration = scope.record_query_end(start + Duration::from_millis(millis));
        evaluate(scope, duration)
    }

    fn scope_with(max_query_count: u64, single: f64, total: f64) -> RequestScope {
        let config = DiagnosticsConfig {
            max_query_count,
            max_single_query_seconds: single,
            max_total_query_seconds: total,
            ..Default::default()
        };
        RequestScope::new("/", &config, Instant::now())
    }

    #[test]
    fn test_fast_queries_do_not_violate() {
        let mut scope = scope_with(10, 0.2, 0.4);
        let now = Instant::now();
        for _ in 0..9 {
            assert_eq!(run_query(&mut scope, now, 10), None);
        }
    }

    #[test]
    fn test_single_query_violation() {
        let mut scope = scope_with(10, 0.2, 10.0);
        let now = Instant::now();

        let violation = run_query(&mut scope, now, 300);
        assert!(matches!(violation, Some(Violation::SingleQuery { .. })));

        // A following fast query is unaffected
        assert_eq!(run_query(&mut scope, now, 10), None);
    }

    #[test]
    fn test_total_time_fires_once() {
        let mut scope = scope_with(100, 10.0, 0.4);
        let now = Instant::now();

        assert_eq!(run_query(&mut scope, now, 150), None);
        assert_eq!(run_query(&mut scope, now, 150), None);
        let violation = run_query(&mut scope, now, 150);
        assert!(matches!(violation, Some(Violation::TotalTime { .. })));

        for _ in 0..5 {
            assert_eq!(run_query(&mut scope, now, 150), None);
        }
        assert!(scope.total_time_exceeded());
    }

    #[test]
    fn test_total_time_masks_single_query() {
        let mut scope = scope_with(100, 0.2, 0.4);
        let now = Instant::now();

        // Crosses both budgets at once; only the total-time dump is reported
        let violation = run_query(&mut scope, now, 500);
        assert!(matches!(violation, Some(Violation::TotalTime { .. })));

        // Total time is sticky, so the next slow query reports as single
        let violation = run_query(&mut scope, now, 500);
        assert!(matches!(violation, Some(Violation::SingleQuery { .. })));
    }

    #[test]
    fn test_count_fires_on_equality_only() {
        let mut scope = scope_with(3, 1.0, 100.0);
        let now = Instant::now();

        assert_eq!(run_query(&mut scope, now, 1), None);
        assert_eq!(run_query(&mut scope, now, 1), None);
        assert_eq!(
            run_query(&mut scope, now, 1),
            Some(Violation::QueryCount { count: 3 })
        );
        assert_eq!(run_query(&mut scope, now, 1), None);
        assert_eq!(run_query(&mut scope, now, 1), None);
    }

    #[test]
    fn test_single_query_masks_count() {
        let mut scope = scope_with(1, 0.2, 100.0);
        let now = Instant::now();

        let violation = run_query(&mut scope, now, 300);
        assert!(matches!(violation, Some(Violation::SingleQuery { .. })));
    }

    #[test]
    fn test_message_names_statement() {
        let violation = Violation::SingleQuery {
            duration: Duration::from_millis(250),
            budget_secs: 0.2,
        };
        let message = violation.message("SELECT * FROM users", &["42"]);
        assert!(message.contains("SELECT * FROM users"));
        assert!(message.contains("0.250s"));
        assert!(message.contains("\"42\""));

        let violation = Violation::TotalTime {
            total: Duration::from_millis(500),
            budget_secs: 0.4,
        };
        assert_eq!(
            violation.message("SELECT 1", &()),
            "total query time exceeded for request, triggering statement: SELECT 1, params: () (0.500s > 0.400s)"
        );
    }
}

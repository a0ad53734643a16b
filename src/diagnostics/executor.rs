//! Query engine trait and the instrumenting wrapper around it.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use super::hooks::QueryDiagnostics;
use super::scope::RequestScope;
use crate::error::Result;

/// Trait for the query engine being observed.
///
/// Implementations run one statement with positional parameters and return
/// whatever the engine produces for it.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Rows or other output of a statement.
    type Output: Send;

    /// Execute a statement.
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<Self::Output>;
}

/// Runs every statement of an inner executor through the query hooks.
///
/// The after-hook only fires when the statement succeeds, so a failed query
/// is never counted or timed.
pub struct InstrumentedExecutor<E> {
    inner: E,
    diagnostics: Arc<QueryDiagnostics>,
}

impl<E: QueryExecutor> InstrumentedExecutor<E> {
    /// Wrap an executor.
    pub fn new(inner: E, diagnostics: Arc<QueryDiagnostics>) -> Self {
        Self { inner, diagnostics }
    }

    pub fn diagnostics(&self) -> &QueryDiagnostics {
        &self.diagnostics
    }

    /// Execute a statement on behalf of the request owning `scope`.
    ///
    /// Pass `None` outside of a request. In strict mode a budget violation
    /// fails the call with [`QueryWatchError::Violation`] even though the
    /// statement itself succeeded.
    ///
    /// [`QueryWatchError::Violation`]: crate::error::QueryWatchError::Violation
    pub async fn execute(
        &self,
        mut scope: Option<&mut RequestScope>,
        statement: &str,
        params: &[Value],
    ) -> Result<E::Output> {
        self.diagnostics
            .before_execute(scope.as_deref_mut(), statement, &params);

        let output = match self.inner.execute(statement, params).await {
            Ok(output) => output,
            Err(e) => {
                trace!(statement = %statement, error = %e, "Query failed, skipping accounting");
                return Err(e);
            }
        };

        self.diagnostics.after_execute(scope, statement, &params)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticsConfig;
    use crate::diagnostics::ManualClock;
    use crate::error::QueryWatchError;
    use serde_json::json;
    use std::time::Duration;

    /// Executor that advances a manual clock instead of doing work.
    struct StubDatabase {
        clock: Arc<ManualClock>,
        latency: Duration,
    }

    #[async_trait]
    impl QueryExecutor for StubDatabase {
        type Output = usize;

        async fn execute(&self, statement: &str, params: &[Value]) -> Result<usize> {
            self.clock.advance(self.latency);
            if statement.contains("missing_table") {
                return Err(QueryWatchError::Executor("no such table".to_string()));
            }
            Ok(params.len())
        }
    }

    fn setup(config: DiagnosticsConfig, latency_ms: u64) -> InstrumentedExecutor<StubDatabase> {
        let clock = Arc::new(ManualClock::default());
        let diagnostics = Arc::new(QueryDiagnostics::with_clock(config, clock.clone()));
        InstrumentedExecutor::new(
            StubDatabase {
                clock,
                latency: Duration::from_millis(latency_ms),
            },
            diagnostics,
        )
    }

    #[tokio::test]
    async fn test_execute_counts_queries() {
        let executor = setup(DiagnosticsConfig::default(), 5);
        let mut scope = executor.diagnostics().new_scope("/users");

        let rows = executor
            .execute(Some(&mut scope), "SELECT * FROM users WHERE id = $1", &[json!(1)])
            .await
            .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(scope.query_count(), 1);
        assert_eq!(scope.total_query_time(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_failed_query_is_not_counted() {
        let executor = setup(DiagnosticsConfig::default(), 5);
        let mut scope = executor.diagnostics().new_scope("/users");

        let result = executor
            .execute(Some(&mut scope), "SELECT * FROM missing_table", &[])
            .await;

        assert!(matches!(result, Err(QueryWatchError::Executor(_))));
        assert_eq!(scope.query_count(), 0);
        assert_eq!(scope.total_query_time(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_execute_outside_request() {
        let executor = setup(DiagnosticsConfig::default(), 500);

        let rows = executor
            .execute(None, "CREATE INDEX users_email ON users (email)", &[])
            .await
            .unwrap();

        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_strict_mode_fails_with_url_and_statement() {
        let config = DiagnosticsConfig {
            throw_on_violation: true,
            ..Default::default()
        };
        let executor = setup(config, 300);
        let mut scope = executor.diagnostics().new_scope("http://localhost/users/7");

        let err = executor
            .execute(Some(&mut scope), "SELECT * FROM orders WHERE user_id = $1", &[json!(7)])
            .await
            .unwrap_err();

        match err {
            QueryWatchError::Violation(diagnostic) => {
                assert_eq!(diagnostic.url, "http://localhost/users/7");
                assert!(diagnostic.message.contains("SELECT * FROM orders WHERE user_id = $1"));
            }
            other => panic!("expected violation, got {:?}", other),
        }
    }

    #[test]
    fn test_logging_mode_returns_rows() {
        let executor = setup(DiagnosticsConfig::default(), 300);
        let mut scope = executor.diagnostics().new_scope("http://localhost/users/7");

        let rows = tokio_test::block_on(executor.execute(
            Some(&mut scope),
            "SELECT * FROM orders WHERE user_id = $1",
            &[json!(7)],
        ))
        .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(scope.dump_count(), 1);
    }
}

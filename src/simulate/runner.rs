//! Concurrent request driver.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::diagnostics::{InstrumentedExecutor, QueryExecutor, RequestSummary};
use crate::error::{QueryWatchError, Result};

/// Table name that simulated failing statements query.
pub const FAILING_TABLE: &str = "missing_table";

/// Shape of a simulated workload.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    /// Number of requests to run
    pub requests: usize,
    /// Statements issued by each request
    pub queries_per_request: usize,
    /// Requests allowed in flight at once
    pub concurrency: usize,
    /// Make every n-th statement of a request hit [`FAILING_TABLE`]
    pub fail_every: Option<usize>,
    /// Base URL the simulated requests arrive on
    pub base_url: String,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            requests: 10,
            queries_per_request: 5,
            concurrency: 4,
            fail_every: None,
            base_url: "http://simulated.local".to_string(),
        }
    }
}

/// Result of one simulated request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    #[serde(flatten)]
    pub summary: RequestSummary,
    /// Statements the database rejected
    pub failed_queries: usize,
    /// Diagnostic that failed the request in strict mode
    pub error: Option<String>,
}

/// Run every request of `plan` through `executor`.
///
/// Outcomes are returned in request order.
pub async fn run_simulation<E>(
    executor: Arc<InstrumentedExecutor<E>>,
    plan: &SimulationPlan,
) -> Result<Vec<RequestOutcome>>
where
    E: QueryExecutor + 'static,
{
    let semaphore = Arc::new(Semaphore::new(plan.concurrency.max(1)));

    info!(
        requests = plan.requests,
        queries_per_request = plan.queries_per_request,
        concurrency = plan.concurrency,
        "Starting simulation"
    );

    let handles: Vec<_> = (0..plan.requests)
        .map(|index| {
            let executor = Arc::clone(&executor);
            let semaphore = Arc::clone(&semaphore);
            let plan = plan.clone();
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| QueryWatchError::Executor(e.to_string()))?;
                Ok::<_, QueryWatchError>(run_request(&executor, &plan, index).await)
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for joined in futures::future::join_all(handles).await {
        let outcome = joined
            .map_err(|e| QueryWatchError::Executor(format!("simulated request task failed: {}", e)))??;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

async fn run_request<E: QueryExecutor>(
    executor: &InstrumentedExecutor<E>,
    plan: &SimulationPlan,
    index: usize,
) -> RequestOutcome {
    let mut request = executor
        .diagnostics()
        .request(format!("{}/requests/{}", plan.base_url, index));
    let mut failed_queries = 0;
    let mut error = None;

    for seq in 0..plan.queries_per_request {
        let fails = plan.fail_every.is_some_and(|n| n > 0 && (seq + 1) % n == 0);
        let statement = if fails {
            format!("SELECT * FROM {} WHERE request = $1 AND seq = $2", FAILING_TABLE)
        } else {
            "SELECT * FROM items WHERE request = $1 AND seq = $2".to_string()
        };

        match executor
            .execute(Some(&mut *request), &statement, &[json!(index), json!(seq)])
            .await
        {
            Ok(_) => {}
            Err(QueryWatchError::Violation(diagnostic)) => {
                warn!(url = %diagnostic.url, "Request failed by query diagnostics");
                error = Some(diagnostic.to_string());
                break;
            }
            Err(e) => {
                warn!(request = index, seq = seq, error = %e, "Simulated query failed");
                failed_queries += 1;
            }
        }
    }

    RequestOutcome {
        summary: request.finish(),
        failed_queries,
        error,
    }
}

//! Simulated database.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::trace;

use crate::diagnostics::QueryExecutor;
use crate::error::{QueryWatchError, Result};

/// How long each simulated statement takes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Latency {
    /// Every statement takes the same time
    Fixed(Duration),
    /// Each statement takes a uniformly random time in `[min, max]`
    Uniform { min: Duration, max: Duration },
}

impl Latency {
    /// Pick the latency for the next statement.
    pub fn sample(&self) -> Duration {
        match *self {
            Latency::Fixed(latency) => latency,
            Latency::Uniform { min, max } if max > min => rand::thread_rng().gen_range(min..=max),
            Latency::Uniform { min, .. } => min,
        }
    }
}

/// A database that sleeps instead of doing work.
///
/// Statements containing the failure marker fail without producing rows.
#[derive(Debug, Clone)]
pub struct SimulatedDatabase {
    latency: Latency,
    fail_marker: Option<String>,
}

impl SimulatedDatabase {
    /// Create a simulated database.
    pub fn new(latency: Latency) -> Self {
        Self {
            latency,
            fail_marker: None,
        }
    }

    /// Fail every statement containing `marker`.
    pub fn with_fail_marker(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }
}

#[async_trait]
impl QueryExecutor for SimulatedDatabase {
    type Output = Vec<Value>;

    async fn execute(&self, statement: &str, params: &[Value]) -> Result<Vec<Value>> {
        let latency = self.latency.sample();
        trace!(statement = %statement, latency_ms = latency.as_millis() as u64, "Simulating query");
        tokio::time::sleep(latency).await;

        if let Some(marker) = &self.fail_marker {
            if statement.contains(marker.as_str()) {
                return Err(QueryWatchError::Executor(format!(
                    "simulated failure for statement: {}",
                    statement
                )));
            }
        }

        Ok(vec![json!({ "params": params })])
    }
}

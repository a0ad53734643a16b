//! Simulated workload for exercising the query diagnostics.
//!
//! A fake database with configurable latency and a runner that drives many
//! concurrent requests through [`InstrumentedExecutor`](crate::diagnostics::InstrumentedExecutor).

mod database;
mod runner;

pub use database::{Latency, SimulatedDatabase};
pub use runner::{run_simulation, RequestOutcome, SimulationPlan, FAILING_TABLE};

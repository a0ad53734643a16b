//! Querywatch - Per-request database query diagnostics
//!
//! This crate times every query a request issues, checks the request against
//! query-count and query-time budgets, and emits rate-limited stack dumps when
//! a budget is crossed so that misbehaving requests show up in the logs
//! without flooding them under load.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod simulate;

//! Common utilities shared by the storage test fixtures.
//!
//! This crate provides:
//! - Container configuration loading
//! - Retry logic with backoff and elapsed-time budgets
//! - Tracing setup for test runs

pub mod config;
pub mod retry;
pub mod telemetry;

// Re-export commonly used types
pub use config::ContainerConfig;
pub use retry::{retry_with_predicate, ExponentialBackoff, RetryConfig};
pub use telemetry::init_test_tracing;

//! # Utility Modules
//!
//! Supporting utilities for logging, metrics, and timing.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Timeout defaults and async timeout wrappers

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{global_metrics, MetricsSnapshot};

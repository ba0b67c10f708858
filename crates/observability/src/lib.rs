//! Observability infrastructure for SpotX
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics export
//! - Metric sets for the servers and the distribution hub
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("spotx", "info", LogFormat::Pretty)?;
//! observability::metrics::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, DistributionMetrics, RequestMetricsGuard, ServerMetrics};

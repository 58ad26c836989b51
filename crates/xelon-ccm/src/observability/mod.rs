//! Observability
//!
//! - `tracing`: log subscriber with optional OTLP span export
//! - `metrics`: Prometheus metrics for reconcilers, the node cache and forwarding rules

pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};

//! `tracing` subscriber setup shared by the mcporter binaries.

mod subscriber;

pub use subscriber::{build_filter, init_subscriber, TelemetryConfig};

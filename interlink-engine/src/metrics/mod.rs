//! Counter/gauge/histogram metrics registry.

pub mod registry;

pub use registry::{Counter, Gauge, Histogram, MetricsRegistry};

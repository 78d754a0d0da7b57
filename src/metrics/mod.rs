//! Metrics for the race room bot
//!
//! Prometheus counters and gauges covering room lifecycles, frame traffic,
//! rate limiting and discovery. Exposition is left to the embedding
//! application via [`MetricsCollector::render`].

pub mod collector;

pub use collector::{
    DiscoveryMetrics, MetricsCollector, MetricsTimer, OutboundMetrics, RoomMetrics,
    ServiceMetrics,
};

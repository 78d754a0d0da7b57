//! Metrics collection using Prometheus
//!
//! One collector is shared by the supervisor, every room task and the
//! discovery poller. Each collector owns its own registry, so tests can build
//! as many as they like.

use crate::types::CloseReason;
use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the bot service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Room connection metrics
    room_metrics: RoomMetrics,

    /// Outbound traffic metrics
    outbound_metrics: OutboundMetrics,

    /// Discovery metrics
    discovery_metrics: DiscoveryMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Errors returned from handler hooks
    pub handler_errors_total: IntCounterVec,
}

/// Room connection metrics
#[derive(Clone)]
pub struct RoomMetrics {
    /// Rooms currently supervised
    pub active_rooms: IntGauge,

    /// Total room tasks spawned
    pub rooms_spawned_total: IntCounter,

    /// Rooms closed, by reason
    pub rooms_closed_total: IntCounterVec,

    /// Spawns refused because the room limit was reached
    pub rooms_refused_total: IntCounter,

    /// Inbound frames, by frame type
    pub frames_received_total: IntCounterVec,

    /// Inbound frames that could not be parsed
    pub frames_dropped_total: IntCounter,

    /// Reconnect attempts after a failed session or connect
    pub reconnects_total: IntCounter,

    /// How long sessions stayed open
    pub session_duration_seconds: Histogram,
}

/// Outbound traffic metrics
#[derive(Clone)]
pub struct OutboundMetrics {
    /// Frames written to the wire, by kind (message, action, ping)
    pub sent_total: IntCounterVec,

    /// Frames dropped by the rate limiter, by kind
    pub dropped_total: IntCounterVec,
}

/// Discovery metrics
#[derive(Clone)]
pub struct DiscoveryMetrics {
    /// Polls by result (success, error)
    pub polls_total: IntCounterVec,

    /// Races listed by the last successful poll
    pub listed_races: IntGauge,

    /// Poll round-trip time
    pub poll_duration_seconds: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let room_metrics = RoomMetrics::new(&registry)?;
        let outbound_metrics = OutboundMetrics::new(&registry)?;
        let discovery_metrics = DiscoveryMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            room_metrics,
            outbound_metrics,
            discovery_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get room metrics
    pub fn rooms(&self) -> &RoomMetrics {
        &self.room_metrics
    }

    /// Get outbound metrics
    pub fn outbound(&self) -> &OutboundMetrics {
        &self.outbound_metrics
    }

    /// Get discovery metrics
    pub fn discovery(&self) -> &DiscoveryMetrics {
        &self.discovery_metrics
    }

    /// Record a room task being spawned
    pub fn record_room_spawned(&self) {
        self.room_metrics.rooms_spawned_total.inc();
        self.room_metrics.active_rooms.inc();
    }

    /// Record a room task finishing
    pub fn record_room_closed(&self, reason: &CloseReason) {
        self.room_metrics
            .rooms_closed_total
            .with_label_values(&[reason.label()])
            .inc();
        self.room_metrics.active_rooms.dec();
    }

    pub fn record_room_refused(&self) {
        self.room_metrics.rooms_refused_total.inc();
    }

    /// Record an inbound frame by its type label
    pub fn record_frame_received(&self, frame_type: &str) {
        self.room_metrics
            .frames_received_total
            .with_label_values(&[frame_type])
            .inc();
    }

    pub fn record_frame_dropped(&self) {
        self.room_metrics.frames_dropped_total.inc();
    }

    pub fn record_reconnect(&self) {
        self.room_metrics.reconnects_total.inc();
    }

    /// Record how long a session stayed open
    pub fn record_session(&self, duration: Duration) {
        self.room_metrics
            .session_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_outbound_sent(&self, kind: &str) {
        self.outbound_metrics
            .sent_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn record_outbound_dropped(&self, kind: &str) {
        self.outbound_metrics
            .dropped_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record an error returned by a handler hook
    pub fn record_handler_error(&self, hook: &str) {
        self.service_metrics
            .handler_errors_total
            .with_label_values(&[hook])
            .inc();
    }

    /// Record a discovery poll
    pub fn record_discovery_poll(&self, success: bool, listed: usize, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.discovery_metrics
            .polls_total
            .with_label_values(&[status])
            .inc();

        if success {
            self.discovery_metrics.listed_races.set(listed as i64);
        }

        self.discovery_metrics
            .poll_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update uptime
    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("racetime_bot_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "racetime_bot_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let handler_errors_total = IntCounterVec::new(
            Opts::new(
                "racetime_bot_handler_errors_total",
                "Errors returned by handler hooks",
            ),
            &["hook"],
        )?;
        registry.register(Box::new(handler_errors_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            handler_errors_total,
        })
    }
}

impl RoomMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_rooms =
            IntGauge::new("racetime_bot_active_rooms", "Rooms currently supervised")?;
        registry.register(Box::new(active_rooms.clone()))?;

        let rooms_spawned_total =
            IntCounter::new("racetime_bot_rooms_spawned_total", "Total room tasks spawned")?;
        registry.register(Box::new(rooms_spawned_total.clone()))?;

        let rooms_closed_total = IntCounterVec::new(
            Opts::new("racetime_bot_rooms_closed_total", "Rooms closed by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rooms_closed_total.clone()))?;

        let rooms_refused_total = IntCounter::new(
            "racetime_bot_rooms_refused_total",
            "Spawns refused at the room limit",
        )?;
        registry.register(Box::new(rooms_refused_total.clone()))?;

        let frames_received_total = IntCounterVec::new(
            Opts::new(
                "racetime_bot_frames_received_total",
                "Inbound frames by type",
            ),
            &["frame_type"],
        )?;
        registry.register(Box::new(frames_received_total.clone()))?;

        let frames_dropped_total = IntCounter::new(
            "racetime_bot_frames_dropped_total",
            "Inbound frames dropped as malformed",
        )?;
        registry.register(Box::new(frames_dropped_total.clone()))?;

        let reconnects_total =
            IntCounter::new("racetime_bot_reconnects_total", "Room reconnect attempts")?;
        registry.register(Box::new(reconnects_total.clone()))?;

        let session_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "racetime_bot_session_duration_seconds",
                "How long room sessions stayed open",
            )
            .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]),
        )?;
        registry.register(Box::new(session_duration_seconds.clone()))?;

        Ok(Self {
            active_rooms,
            rooms_spawned_total,
            rooms_closed_total,
            rooms_refused_total,
            frames_received_total,
            frames_dropped_total,
            reconnects_total,
            session_duration_seconds,
        })
    }
}

impl OutboundMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sent_total = IntCounterVec::new(
            Opts::new("racetime_bot_outbound_sent_total", "Outbound frames sent"),
            &["kind"],
        )?;
        registry.register(Box::new(sent_total.clone()))?;

        let dropped_total = IntCounterVec::new(
            Opts::new(
                "racetime_bot_outbound_dropped_total",
                "Outbound frames dropped by the rate limiter",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(dropped_total.clone()))?;

        Ok(Self {
            sent_total,
            dropped_total,
        })
    }
}

impl DiscoveryMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let polls_total = IntCounterVec::new(
            Opts::new("racetime_bot_discovery_polls_total", "Discovery polls"),
            &["status"],
        )?;
        registry.register(Box::new(polls_total.clone()))?;

        let listed_races = IntGauge::new(
            "racetime_bot_discovery_listed_races",
            "Races listed by the last successful poll",
        )?;
        registry.register(Box::new(listed_races.clone()))?;

        let poll_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "racetime_bot_discovery_poll_duration_seconds",
                "Discovery poll duration",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(poll_duration_seconds.clone()))?;

        Ok(Self {
            polls_total,
            listed_races,
            poll_duration_seconds,
        })
    }
}

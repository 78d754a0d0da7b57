//! Health checks and monitoring
//!
//! This module summarises whether the bot is running and how its room
//! connections are doing.

use crate::room::ConnectionStatus;
use crate::service::app::BotService;
use crate::utils::current_timestamp;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Value exported through the health gauge
    pub fn gauge_value(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// Combine with a component status, keeping the worse of the two
    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.gauge_value() <= other.gauge_value() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Why the component is not healthy
    pub message: Option<String>,
}

/// Room statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub active_rooms: usize,
    /// Rooms per connection status
    pub rooms_by_status: HashMap<String, usize>,
    pub rooms_spawned: u64,
    pub rooms_finished: u64,
    pub rooms_failed: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Check the service and every supervised room
    pub async fn check(service: &BotService) -> Result<Self> {
        let mut checks = Vec::new();

        let running = Self::check_service_running(service).await;
        let mut overall_status = running.status;
        checks.push(running);

        let states = service.supervisor().states().await;
        let mut rooms_by_status: HashMap<String, usize> = HashMap::new();
        for state in states.values() {
            *rooms_by_status.entry(state.status.to_string()).or_default() += 1;
        }

        let rooms = Self::check_rooms(&rooms_by_status);
        overall_status = overall_status.worst(rooms.status);
        checks.push(rooms);

        let supervisor_stats = service.supervisor().stats();
        let stats = ServiceStats {
            active_rooms: states.len(),
            rooms_by_status,
            rooms_spawned: supervisor_stats.rooms_spawned,
            rooms_finished: supervisor_stats.rooms_finished,
            rooms_failed: supervisor_stats.rooms_failed,
            uptime_seconds: service.uptime().as_secs(),
        };

        service
            .metrics_collector()
            .update_health_status(overall_status.gauge_value());

        Ok(HealthCheck {
            status: overall_status,
            service: service.config().service.name.clone(),
            version: crate::VERSION.to_string(),
            timestamp: current_timestamp(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(service: &BotService) -> HealthStatus {
        Self::check_service_running(service).await.status
    }

    async fn check_service_running(service: &BotService) -> ComponentCheck {
        let (status, message) = if service.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
        }
    }

    fn check_rooms(rooms_by_status: &HashMap<String, usize>) -> ComponentCheck {
        let reconnecting = rooms_by_status
            .get(&ConnectionStatus::Reconnecting.to_string())
            .copied()
            .unwrap_or(0);

        let (status, message) = if reconnecting > 0 {
            (
                HealthStatus::Degraded,
                Some(format!("{} rooms reconnecting", reconnecting)),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        ComponentCheck {
            name: "rooms".to_string(),
            status,
            message,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

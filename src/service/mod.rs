//! Service layer for the race room bot
//!
//! This module contains the service that ties discovery, the supervisor and
//! the background tasks together, plus health reporting.

pub mod app;
pub mod health;

pub use app::{BotService, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};

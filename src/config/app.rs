//! Main application configuration
//!
//! This module defines the configuration for the race room bot, including
//! environment variable and TOML file loading and validation. The typed
//! configs used by rooms and the supervisor are derived from it.

use crate::backoff::BackoffConfig;
use crate::rate_limit::{OverflowPolicy, RateLimitConfig};
use crate::room::{OversizePolicy, RoomConfig};
use crate::supervisor::SupervisorConfig;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub server: ServerSettings,
    pub discovery: DiscoverySettings,
    pub connection: ConnectionSettings,
    pub chat: ChatSettings,
    pub rate_limit: RateLimitSettings,
    pub backoff: BackoffSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
    /// Maximum number of rooms connected at once
    pub max_concurrent_rooms: usize,
    /// How often service statistics are logged
    pub stats_interval_seconds: u64,
}

/// Race server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host (and optional port) of the race server
    pub host: String,
    /// Use https/wss instead of http/ws
    pub secure: bool,
    /// Category whose races the bot joins
    pub category: String,
    /// Pre-issued bearer token for the bot connection
    pub access_token: Option<String>,
}

/// Race discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub poll_interval_seconds: u64,
    /// Consecutive polls a race may be missing before its room is torn down
    pub grace_polls: u32,
    pub request_timeout_seconds: u64,
}

/// Per-room connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_seconds: u64,
    /// Idle time before a keepalive ping is sent
    pub keepalive_idle_seconds: u64,
    /// Time allowed for any frame to arrive after a ping
    pub keepalive_response_seconds: u64,
    pub close_timeout_seconds: u64,
    /// Chat messages kept per room
    pub history_limit: usize,
}

/// Chat and command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub command_prefix: String,
    /// Maximum outbound message length in characters
    pub max_message_length: usize,
    pub oversize_policy: OversizePolicy,
}

/// Outbound rate limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub chat_capacity: u32,
    pub chat_refill_per_second: f64,
    pub action_capacity: u32,
    pub action_refill_per_second: f64,
    pub max_queue_depth: usize,
    pub overflow_policy: OverflowPolicy,
}

/// Reconnect backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
    pub reset_after_seconds: u64,
    /// Unset retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "racetime-bot".to_string(),
            log_level: "info".to_string(),
            shutdown_timeout_seconds: 30,
            max_concurrent_rooms: 100,
            stats_interval_seconds: 60,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "racetime.gg".to_string(),
            secure: true,
            category: String::new(),
            access_token: None,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            grace_polls: 2,
            request_timeout_seconds: 10,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            keepalive_idle_seconds: 20,
            keepalive_response_seconds: 10,
            close_timeout_seconds: 5,
            history_limit: 100,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            max_message_length: 1000,
            oversize_policy: OversizePolicy::Truncate,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let chat = RateLimitConfig::chat();
        let actions = RateLimitConfig::actions();
        Self {
            chat_capacity: chat.capacity,
            chat_refill_per_second: chat.refill_per_second,
            action_capacity: actions.capacity,
            action_refill_per_second: actions.refill_per_second,
            max_queue_depth: chat.max_queue_depth,
            overflow_policy: chat.overflow,
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: 60_000,
            jitter_ms: 1000,
            reset_after_seconds: 60,
            max_attempts: None,
        }
    }
}

/// Read and parse an environment variable if it is set
fn env_value<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

fn parse_oversize_policy(value: &str) -> Result<OversizePolicy> {
    match value.to_lowercase().as_str() {
        "truncate" => Ok(OversizePolicy::Truncate),
        "reject" => Ok(OversizePolicy::Reject),
        _ => Err(anyhow!("Invalid RACEBOT_OVERSIZE_POLICY value: {}", value)),
    }
}

fn parse_overflow_policy(value: &str) -> Result<OverflowPolicy> {
    match value.to_lowercase().as_str() {
        "drop_oldest" => Ok(OverflowPolicy::DropOldest),
        "reject_new" => Ok(OverflowPolicy::RejectNew),
        _ => Err(anyhow!("Invalid RACEBOT_OVERFLOW_POLICY value: {}", value)),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    ///
    /// The result is not validated; run [`validate_config`] once any further
    /// overrides have been applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still
    /// override file values
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;

        let mut config = Self::from_toml(&contents)
            .map_err(|e| anyhow!("Invalid config file {}: {}", path.display(), e))?;
        config.apply_env()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Override settings from `RACEBOT_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Some(name) = env_value("RACEBOT_SERVICE_NAME")? {
            self.service.name = name;
        }
        if let Some(level) = env_value("RACEBOT_LOG_LEVEL")? {
            self.service.log_level = level;
        }
        if let Some(timeout) = env_value("RACEBOT_SHUTDOWN_TIMEOUT_SECONDS")? {
            self.service.shutdown_timeout_seconds = timeout;
        }
        if let Some(max_rooms) = env_value("RACEBOT_MAX_CONCURRENT_ROOMS")? {
            self.service.max_concurrent_rooms = max_rooms;
        }
        if let Some(interval) = env_value("RACEBOT_STATS_INTERVAL_SECONDS")? {
            self.service.stats_interval_seconds = interval;
        }

        // Server settings
        if let Some(host) = env_value("RACEBOT_HOST")? {
            self.server.host = host;
        }
        if let Some(secure) = env_value("RACEBOT_SECURE")? {
            self.server.secure = secure;
        }
        if let Some(category) = env_value("RACEBOT_CATEGORY")? {
            self.server.category = category;
        }
        if let Ok(token) = env::var("RACEBOT_ACCESS_TOKEN") {
            self.server.access_token = Some(token).filter(|t| !t.is_empty());
        }

        // Discovery settings
        if let Some(interval) = env_value("RACEBOT_POLL_INTERVAL_SECONDS")? {
            self.discovery.poll_interval_seconds = interval;
        }
        if let Some(grace) = env_value("RACEBOT_GRACE_POLLS")? {
            self.discovery.grace_polls = grace;
        }
        if let Some(timeout) = env_value("RACEBOT_REQUEST_TIMEOUT_SECONDS")? {
            self.discovery.request_timeout_seconds = timeout;
        }

        // Connection settings
        if let Some(timeout) = env_value("RACEBOT_CONNECT_TIMEOUT_SECONDS")? {
            self.connection.connect_timeout_seconds = timeout;
        }
        if let Some(idle) = env_value("RACEBOT_KEEPALIVE_IDLE_SECONDS")? {
            self.connection.keepalive_idle_seconds = idle;
        }
        if let Some(response) = env_value("RACEBOT_KEEPALIVE_RESPONSE_SECONDS")? {
            self.connection.keepalive_response_seconds = response;
        }
        if let Some(timeout) = env_value("RACEBOT_CLOSE_TIMEOUT_SECONDS")? {
            self.connection.close_timeout_seconds = timeout;
        }
        if let Some(limit) = env_value("RACEBOT_HISTORY_LIMIT")? {
            self.connection.history_limit = limit;
        }

        // Chat settings
        if let Ok(prefix) = env::var("RACEBOT_COMMAND_PREFIX") {
            self.chat.command_prefix = prefix;
        }
        if let Some(length) = env_value("RACEBOT_MAX_MESSAGE_LENGTH")? {
            self.chat.max_message_length = length;
        }
        if let Ok(policy) = env::var("RACEBOT_OVERSIZE_POLICY") {
            self.chat.oversize_policy = parse_oversize_policy(&policy)?;
        }

        // Rate limit settings
        if let Some(capacity) = env_value("RACEBOT_CHAT_CAPACITY")? {
            self.rate_limit.chat_capacity = capacity;
        }
        if let Some(refill) = env_value("RACEBOT_CHAT_REFILL_PER_SECOND")? {
            self.rate_limit.chat_refill_per_second = refill;
        }
        if let Some(capacity) = env_value("RACEBOT_ACTION_CAPACITY")? {
            self.rate_limit.action_capacity = capacity;
        }
        if let Some(refill) = env_value("RACEBOT_ACTION_REFILL_PER_SECOND")? {
            self.rate_limit.action_refill_per_second = refill;
        }
        if let Some(depth) = env_value("RACEBOT_MAX_QUEUE_DEPTH")? {
            self.rate_limit.max_queue_depth = depth;
        }
        if let Ok(policy) = env::var("RACEBOT_OVERFLOW_POLICY") {
            self.rate_limit.overflow_policy = parse_overflow_policy(&policy)?;
        }

        // Backoff settings
        if let Some(base) = env_value("RACEBOT_BACKOFF_BASE_MS")? {
            self.backoff.base_ms = base;
        }
        if let Some(max) = env_value("RACEBOT_BACKOFF_MAX_MS")? {
            self.backoff.max_ms = max;
        }
        if let Some(jitter) = env_value("RACEBOT_BACKOFF_JITTER_MS")? {
            self.backoff.jitter_ms = jitter;
        }
        if let Some(reset) = env_value("RACEBOT_BACKOFF_RESET_AFTER_SECONDS")? {
            self.backoff.reset_after_seconds = reset;
        }
        if let Some(attempts) = env_value::<u32>("RACEBOT_BACKOFF_MAX_ATTEMPTS")? {
            self.backoff.max_attempts = Some(attempts).filter(|&n| n > 0);
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get stats logging interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.service.stats_interval_seconds)
    }

    /// Get discovery poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.poll_interval_seconds)
    }

    /// Get discovery HTTP request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.request_timeout_seconds)
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(self.backoff.base_ms),
            max_delay: Duration::from_millis(self.backoff.max_ms),
            jitter: Duration::from_millis(self.backoff.jitter_ms),
            reset_after: Duration::from_secs(self.backoff.reset_after_seconds),
            max_attempts: self.backoff.max_attempts,
        }
    }

    pub fn chat_rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.rate_limit.chat_capacity,
            refill_per_second: self.rate_limit.chat_refill_per_second,
            max_queue_depth: self.rate_limit.max_queue_depth,
            overflow: self.rate_limit.overflow_policy,
        }
    }

    pub fn action_rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.rate_limit.action_capacity,
            refill_per_second: self.rate_limit.action_refill_per_second,
            max_queue_depth: self.rate_limit.max_queue_depth,
            overflow: self.rate_limit.overflow_policy,
        }
    }

    /// Settings every room connection is created with
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            command_prefix: self.chat.command_prefix.clone(),
            max_message_length: self.chat.max_message_length,
            oversize_policy: self.chat.oversize_policy,
            history_limit: self.connection.history_limit,
            chat_limit: self.chat_rate_limit(),
            action_limit: self.action_rate_limit(),
            backoff: self.backoff_config(),
            connect_timeout: Duration::from_secs(self.connection.connect_timeout_seconds),
            keepalive_idle: Duration::from_secs(self.connection.keepalive_idle_seconds),
            keepalive_response: Duration::from_secs(self.connection.keepalive_response_seconds),
            close_timeout: Duration::from_secs(self.connection.close_timeout_seconds),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_concurrent_rooms: self.service.max_concurrent_rooms,
            close_grace: Duration::from_secs(self.connection.close_timeout_seconds)
                .max(Duration::from_secs(1))
                * 2,
        }
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.max_concurrent_rooms == 0 {
        return Err(anyhow!("max_concurrent_rooms must be greater than 0"));
    }
    if config.service.stats_interval_seconds == 0 {
        return Err(anyhow!("stats_interval_seconds must be greater than 0"));
    }

    if config.server.host.trim().is_empty() {
        return Err(anyhow!("Server host cannot be empty"));
    }
    if config.server.category.trim().is_empty() {
        return Err(anyhow!("Race category cannot be empty"));
    }

    if config.discovery.poll_interval_seconds == 0 {
        return Err(anyhow!("poll_interval_seconds must be greater than 0"));
    }
    if config.discovery.request_timeout_seconds == 0 {
        return Err(anyhow!("request_timeout_seconds must be greater than 0"));
    }

    if config.connection.connect_timeout_seconds == 0 {
        return Err(anyhow!("connect_timeout_seconds must be greater than 0"));
    }
    if config.connection.keepalive_idle_seconds == 0 {
        return Err(anyhow!("keepalive_idle_seconds must be greater than 0"));
    }
    if config.connection.keepalive_response_seconds == 0 {
        return Err(anyhow!("keepalive_response_seconds must be greater than 0"));
    }

    if config.chat.command_prefix.is_empty() {
        return Err(anyhow!("Command prefix cannot be empty"));
    }
    if config.chat.max_message_length == 0 {
        return Err(anyhow!("max_message_length must be greater than 0"));
    }

    if config.rate_limit.chat_capacity == 0 || config.rate_limit.action_capacity == 0 {
        return Err(anyhow!("Rate limit capacities must be greater than 0"));
    }
    for (name, refill) in [
        ("chat_refill_per_second", config.rate_limit.chat_refill_per_second),
        ("action_refill_per_second", config.rate_limit.action_refill_per_second),
    ] {
        if !(refill.is_finite() && refill > 0.0) {
            return Err(anyhow!(
                "Invalid {} value: {} (must be a positive finite number)",
                name,
                refill
            ));
        }
    }
    if config.rate_limit.max_queue_depth == 0 {
        return Err(anyhow!("max_queue_depth must be greater than 0"));
    }

    if config.backoff.base_ms == 0 {
        return Err(anyhow!("Backoff base_ms must be greater than 0"));
    }
    if config.backoff.base_ms > config.backoff.max_ms {
        return Err(anyhow!(
            "Backoff base_ms ({}) cannot exceed max_ms ({})",
            config.backoff.base_ms,
            config.backoff.max_ms
        ));
    }

    Ok(())
}

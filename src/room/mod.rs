//! A single race room: its connection state machine and the handle exposed
//! to handlers

pub mod connection;
pub mod handle;
pub mod state;

pub use connection::RoomConnection;
pub use handle::RoomHandle;
pub use state::{ConnectionState, ConnectionStatus};

use crate::backoff::BackoffConfig;
use crate::rate_limit::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do with a chat message longer than the configured maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    Truncate,
    Reject,
}

/// Per-room settings derived from the application config
#[derive(Debug, Clone, PartialEq)]
pub struct RoomConfig {
    pub command_prefix: String,
    /// In characters
    pub max_message_length: usize,
    pub oversize_policy: OversizePolicy,
    /// Chat messages kept in the local log
    pub history_limit: usize,
    pub chat_limit: RateLimitConfig,
    pub action_limit: RateLimitConfig,
    pub backoff: BackoffConfig,
    pub connect_timeout: Duration,
    /// Silence after which a ping is sent
    pub keepalive_idle: Duration,
    /// How long to wait for any frame after a ping
    pub keepalive_response: Duration,
    pub close_timeout: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            max_message_length: 1000,
            oversize_policy: OversizePolicy::Truncate,
            history_limit: 100,
            chat_limit: RateLimitConfig::chat(),
            action_limit: RateLimitConfig::actions(),
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(10),
            keepalive_idle: Duration::from_secs(20),
            keepalive_response: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

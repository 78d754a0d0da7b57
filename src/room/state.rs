//! Observable connection state of a room

use std::fmt;
use tokio::time::Instant;

/// Lifecycle of a room connection
///
/// `Connecting → Open → Reconnecting → Connecting ...` until a graceful or
/// fatal end leads through `Closing` (graceful only) to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

impl ConnectionStatus {
    pub fn is_terminal(self) -> bool {
        self == ConnectionStatus::Closed
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Closing => "closing",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Snapshot published by a room task on every transition
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Last time any frame arrived
    pub last_activity: Option<Instant>,
    /// Consecutive failed attempts since the last reset
    pub retry_count: u32,
    /// When the next connect attempt is due while reconnecting
    pub next_retry_at: Option<Instant>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            last_activity: None,
            retry_count: 0,
            next_retry_at: None,
        }
    }
}

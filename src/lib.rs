//! Racetime Bot - live presence for bots in online race rooms
//!
//! This crate discovers the active races of a category, keeps one supervised
//! connection per race room, mirrors room state locally, and dispatches chat
//! commands to pluggable per-room handlers with rate-limited replies.

pub mod backoff;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;
pub mod room;
pub mod service;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{BotError, Result};
pub use types::*;

// Re-export key components
pub use discovery::{DiscoveryPoller, HttpRaceDiscovery, RaceDiscovery};
pub use handler::{Command, HandlerFactory, RaceHandler};
pub use room::{ConnectionState, ConnectionStatus, RoomConfig, RoomHandle};
pub use supervisor::{SpawnOutcome, Supervisor, SupervisorConfig};
pub use transport::{Channel, Transport, WebSocketTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

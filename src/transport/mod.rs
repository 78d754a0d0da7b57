//! Duplex message transport used by room connections
//!
//! The room state machine only sees text frames through [`Channel`]; the
//! default [`WebSocketTransport`] speaks WebSocket, and tests plug in
//! scripted in-memory transports.

pub mod websocket;

pub use websocket::WebSocketTransport;

use crate::error::Result;
use async_trait::async_trait;

/// Opens channels to race rooms
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a room endpoint
    ///
    /// A rejected handshake that retrying cannot fix (bad credentials) must
    /// be reported as [`BotError::Fatal`](crate::error::BotError::Fatal).
    async fn connect(&self, url: &str) -> Result<Box<dyn Channel>>;
}

/// An established text channel owned by a single room task
#[async_trait]
pub trait Channel: Send {
    /// Send one text frame
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next text frame, `None` once the peer has closed the channel
    ///
    /// Must be cancel-safe: dropping the future loses no frame.
    async fn receive(&mut self) -> Option<Result<String>>;

    /// Close the channel
    async fn close(&mut self) -> Result<()>;
}

//! Per-room handler interface
//!
//! A [`HandlerFactory`] builds one [`RaceHandler`] per room. The room task owns
//! its handler and calls it strictly in order; no two calls for the same room
//! ever overlap, while different rooms run concurrently.

pub mod command;
pub mod permissions;

pub use command::Command;
pub use permissions::{can_moderate, can_monitor, require, require_for, Permission};

use crate::error::{BotError, Result};
use crate::room::RoomHandle;
use crate::types::{ChatMessage, CloseReason, RaceRoom};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Category-specific bot logic for a single race room
///
/// Every hook defaults to a no-op. Errors returned from hooks are logged and
/// counted but never close the room.
#[async_trait]
pub trait RaceHandler: Send {
    /// A session was established; fires again after every reconnect
    async fn on_open(&mut self, _room: &RoomHandle) -> Result<()> {
        Ok(())
    }

    /// A new authoritative race snapshot arrived
    async fn on_race_data(&mut self, _room: &RoomHandle, _race: &RaceRoom) -> Result<()> {
        Ok(())
    }

    /// A chat message that is not a command
    async fn on_chat_message(&mut self, _room: &RoomHandle, _message: &ChatMessage) -> Result<()> {
        Ok(())
    }

    /// A chat message that parsed as a command
    async fn on_command(
        &mut self,
        _room: &RoomHandle,
        _command: &Command,
        _message: &ChatMessage,
    ) -> Result<()> {
        Ok(())
    }

    /// The server sent an error frame, or an outbound frame was dropped
    async fn on_error(&mut self, _room: &RoomHandle, _error: &BotError) -> Result<()> {
        Ok(())
    }

    /// The room is closing; outbound frames queued here are still flushed on
    /// graceful closes
    async fn on_close(&mut self, _room: &RoomHandle, _reason: &CloseReason) -> Result<()> {
        Ok(())
    }

    /// Whether the room should close after this snapshot
    fn should_stop(&self, race: &RaceRoom) -> bool {
        race.status().is_terminal()
    }
}

/// Builds a handler for each newly supervised room
pub trait HandlerFactory: Send + Sync {
    fn create(&self, slug: &str) -> Box<dyn RaceHandler>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&str) -> Box<dyn RaceHandler> + Send + Sync,
{
    fn create(&self, slug: &str) -> Box<dyn RaceHandler> {
        self(slug)
    }
}

/// Handler that only logs what happens in its room
#[derive(Debug, Default)]
pub struct LoggingHandler {
    commands_seen: u64,
}

#[async_trait]
impl RaceHandler for LoggingHandler {
    async fn on_open(&mut self, room: &RoomHandle) -> Result<()> {
        info!("[{}] Connected", room.slug());
        Ok(())
    }

    async fn on_race_data(&mut self, room: &RoomHandle, race: &RaceRoom) -> Result<()> {
        debug!(
            "[{}] Race is {} with {} entrants",
            room.slug(),
            race.status(),
            race.entrants.len()
        );
        Ok(())
    }

    async fn on_chat_message(&mut self, room: &RoomHandle, message: &ChatMessage) -> Result<()> {
        debug!(
            "[{}] {}: {}",
            room.slug(),
            message.author().unwrap_or("system"),
            message.text
        );
        Ok(())
    }

    async fn on_command(
        &mut self,
        room: &RoomHandle,
        command: &Command,
        message: &ChatMessage,
    ) -> Result<()> {
        self.commands_seen += 1;
        info!(
            "[{}] Command !{} {:?} from {}",
            room.slug(),
            command.verb,
            command.args,
            message.author().unwrap_or("unknown")
        );
        Ok(())
    }

    async fn on_error(&mut self, room: &RoomHandle, error: &BotError) -> Result<()> {
        warn!("[{}] {}", room.slug(), error);
        Ok(())
    }

    async fn on_close(&mut self, room: &RoomHandle, reason: &CloseReason) -> Result<()> {
        info!(
            "[{}] Closed ({}) after {} commands",
            room.slug(),
            reason,
            self.commands_seen
        );
        Ok(())
    }
}

/// Factory for [`LoggingHandler`]
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandlerFactory;

impl HandlerFactory for LoggingHandlerFactory {
    fn create(&self, _slug: &str) -> Box<dyn RaceHandler> {
        Box::<LoggingHandler>::default()
    }
}

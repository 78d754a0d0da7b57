//! Permission checks for chat commands

use crate::handler::command::Command;
use crate::room::RoomHandle;
use crate::types::ChatMessage;
use tracing::debug;

/// Who may run a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Anyone,
    /// Category moderators
    Moderator,
    /// Race monitors, which includes moderators
    Monitor,
}

/// Whether the author of `message` is a category moderator
pub fn can_moderate(message: &ChatMessage) -> bool {
    message.user.as_ref().is_some_and(|user| user.can_moderate)
}

/// Whether the author of `message` may monitor the race
pub fn can_monitor(message: &ChatMessage) -> bool {
    message.is_monitor || can_moderate(message)
}

/// Check a permission, replying in chat when it is denied
pub fn require(room: &RoomHandle, message: &ChatMessage, permission: Permission) -> bool {
    let (allowed, role) = match permission {
        Permission::Anyone => (true, ""),
        Permission::Moderator => (can_moderate(message), "moderators"),
        Permission::Monitor => (can_monitor(message), "race monitors"),
    };
    if allowed {
        return true;
    }

    let name = message.author().unwrap_or("friend");
    let reply = format!("Sorry {}, only {} can do that.", name, role);
    if let Err(e) = room.send_message(&reply) {
        debug!("[{}] Could not send permission reply: {}", room.slug(), e);
    }
    false
}

/// Convenience wrapper for command handlers
pub fn require_for(
    room: &RoomHandle,
    command: &Command,
    message: &ChatMessage,
    permission: Permission,
) -> bool {
    let allowed = require(room, message, permission);
    if !allowed {
        debug!(
            "[{}] Denied !{} for {}",
            room.slug(),
            command.verb,
            message.author().unwrap_or("unknown")
        );
    }
    allowed
}

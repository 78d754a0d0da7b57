//! Outbound frames: chat messages and race actions

use crate::error::{BotError, Result};
use crate::protocol::message_actions::{actions_value, MessageAction};
use crate::types::UserId;
use crate::utils::generate_guid;
use serde_json::{json, Map, Value};

/// How new user info is combined with the info already on the race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoMerge {
    /// `new | existing`
    Prefix,
    /// `existing | new`
    Suffix,
    /// Replace whatever is there
    Overwrite,
}

impl InfoMerge {
    /// Combine `info` with the existing user info of a race
    pub fn apply(self, info: &str, existing: Option<&str>) -> String {
        match (self, existing.filter(|existing| !existing.is_empty())) {
            (InfoMerge::Prefix, Some(existing)) => format!("{} | {}", info, existing),
            (InfoMerge::Suffix, Some(existing)) => format!("{} | {}", existing, info),
            _ => info.to_string(),
        }
    }
}

/// Structured action a bot can take in a race room
#[derive(Debug, Clone, PartialEq)]
pub enum RaceAction {
    Ready,
    Unready,
    Done,
    Undone,
    Forfeit,
    /// Set the bot-controlled info line
    SetBotInfo(String),
    /// Set the user-visible info line
    SetUserInfo(String),
    MakeOpen,
    MakeInvitational,
    /// Force the race to start
    Begin,
    Cancel,
    Invite(UserId),
    AcceptRequest(UserId),
    ForceUnready(UserId),
    RemoveEntrant(UserId),
    AddMonitor(UserId),
    RemoveMonitor(UserId),
}

impl RaceAction {
    /// Wire name of the action
    pub fn name(&self) -> &'static str {
        match self {
            RaceAction::Ready => "ready",
            RaceAction::Unready => "unready",
            RaceAction::Done => "done",
            RaceAction::Undone => "undone",
            RaceAction::Forfeit => "forfeit",
            RaceAction::SetBotInfo(_) | RaceAction::SetUserInfo(_) => "setinfo",
            RaceAction::MakeOpen => "make_open",
            RaceAction::MakeInvitational => "make_invitational",
            RaceAction::Begin => "begin",
            RaceAction::Cancel => "cancel",
            RaceAction::Invite(_) => "invite",
            RaceAction::AcceptRequest(_) => "accept_request",
            RaceAction::ForceUnready(_) => "force_unready",
            RaceAction::RemoveEntrant(_) => "remove_entrant",
            RaceAction::AddMonitor(_) => "add_monitor",
            RaceAction::RemoveMonitor(_) => "remove_monitor",
        }
    }

    fn data(&self) -> Value {
        match self {
            RaceAction::SetBotInfo(info) => json!({ "info_bot": info }),
            RaceAction::SetUserInfo(info) => json!({ "info_user": info }),
            RaceAction::Invite(user)
            | RaceAction::AcceptRequest(user)
            | RaceAction::ForceUnready(user)
            | RaceAction::RemoveEntrant(user)
            | RaceAction::AddMonitor(user)
            | RaceAction::RemoveMonitor(user) => json!({ "user": user }),
            _ => json!({}),
        }
    }

    /// Serialize to `{"action": ..., "data": {...}}`
    pub fn to_frame(&self) -> Result<String> {
        encode(&json!({ "action": self.name(), "data": self.data() }))
    }
}

/// Optional extras for a chat message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageOptions {
    /// Pin the message in the room
    pub pinned: bool,
    /// Send privately to a single user
    pub direct_to: Option<UserId>,
    pub actions: Vec<MessageAction>,
}

impl MessageOptions {
    pub fn pinned() -> Self {
        Self {
            pinned: true,
            ..Self::default()
        }
    }

    pub fn direct_to(user: impl Into<UserId>) -> Self {
        Self {
            direct_to: Some(user.into()),
            ..Self::default()
        }
    }

    pub fn with_actions(mut self, actions: Vec<MessageAction>) -> Self {
        self.actions = actions;
        self
    }
}

/// A chat message ready to be queued
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub text: String,
    /// Correlation id echoed back by the server
    pub guid: String,
    pub options: MessageOptions,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>, options: MessageOptions) -> Self {
        Self {
            text: text.into(),
            guid: generate_guid(),
            options,
        }
    }

    /// Serialize to `{"action": "message", "data": {...}}`
    pub fn to_frame(&self) -> Result<String> {
        let mut data = Map::new();
        data.insert("message".to_string(), json!(self.text));
        data.insert("guid".to_string(), json!(self.guid));
        if self.options.pinned {
            data.insert("pinned".to_string(), json!(true));
        }
        if let Some(user) = &self.options.direct_to {
            data.insert("direct_to".to_string(), json!(user));
        }
        if !self.options.actions.is_empty() {
            data.insert("actions".to_string(), actions_value(&self.options.actions));
        }

        encode(&json!({ "action": "message", "data": data }))
    }
}

/// Keepalive ping; bypasses the outbound limiters
pub fn ping_frame() -> String {
    json!({ "action": "ping" }).to_string()
}

fn encode(value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        BotError::InternalError {
            message: format!("Failed to serialize outbound frame: {}", e),
        }
        .into()
    })
}

//! Common types used throughout the race room bot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Unique identifier for a race room (`category/room-name`)
pub type RaceSlug = String;

/// Unique identifier for a user
pub type UserId = String;

/// Lifecycle status of a race room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Open,
    Invitational,
    Pending,
    InProgress,
    Finished,
    Cancelled,
}

impl RaceStatus {
    /// Finished and cancelled rooms never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, RaceStatus::Finished | RaceStatus::Cancelled)
    }
}

impl std::fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaceStatus::Open => write!(f, "open"),
            RaceStatus::Invitational => write!(f, "invitational"),
            RaceStatus::Pending => write!(f, "pending"),
            RaceStatus::InProgress => write!(f, "in_progress"),
            RaceStatus::Finished => write!(f, "finished"),
            RaceStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status of an entrant within a race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrantStatus {
    Requested,
    Invited,
    Joined,
    Ready,
    NotReady,
    InProgress,
    Done,
    Dnf,
    Dq,
}

/// The server wraps every status as `{"value": ..., "verbose_value": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusValue<T> {
    pub value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_value: Option<String>,
}

impl<T> StatusValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            verbose_value: None,
        }
    }
}

/// A user as embedded in race data and chat messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Only present on chat message authors
    #[serde(default)]
    pub can_moderate: bool,
}

impl User {
    /// Name to address the user by
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.name)
    }
}

/// A participant in a race room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrant {
    pub user: User,
    pub status: StatusValue<EntrantStatus>,
}

/// Goal of a race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub name: String,
    #[serde(default)]
    pub custom: bool,
}

/// Authoritative snapshot of a race room pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRoom {
    /// Room slug, unique across the server
    pub name: RaceSlug,
    pub status: StatusValue<RaceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<Goal>,
    #[serde(default)]
    pub entrants: Vec<Entrant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_bot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_user: Option<String>,
    /// Everything else the server sends, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RaceRoom {
    pub fn slug(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> RaceStatus {
        self.status.value
    }

    /// Drop duplicate entrants, keeping the last entry seen for each user id
    pub fn dedup_entrants(&mut self) {
        let mut last_index: HashMap<&str, usize> = HashMap::new();
        for (index, entrant) in self.entrants.iter().enumerate() {
            last_index.insert(entrant.user.id.as_str(), index);
        }
        if last_index.len() == self.entrants.len() {
            return;
        }

        let keep: Vec<bool> = self
            .entrants
            .iter()
            .enumerate()
            .map(|(index, entrant)| last_index.get(entrant.user.id.as_str()) == Some(&index))
            .collect();
        let mut flags = keep.into_iter();
        self.entrants.retain(|_| flags.next().unwrap_or(false));
    }

    /// Look up an entrant by user id
    pub fn entrant(&self, user_id: &str) -> Option<&Entrant> {
        self.entrants.iter().find(|e| e.user.id == user_id)
    }
}

/// A chat message received from a race room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub user: Option<User>,
    /// Name of the bot that posted the message, if any
    #[serde(default)]
    pub bot: Option<String>,
    #[serde(rename = "message", default)]
    pub text: String,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub is_monitor: bool,
}

impl ChatMessage {
    /// Whether the message was posted by a bot rather than a person
    pub fn is_bot_originated(&self) -> bool {
        self.is_bot || self.bot.is_some()
    }

    /// Display name of whoever posted the message
    pub fn author(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(User::display_name)
            .or(self.bot.as_deref())
    }
}

/// Summary of an active race as reported by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSummary {
    pub slug: RaceSlug,
    pub status: RaceStatus,
    /// Where the full race document lives, relative to the server root
    #[serde(default)]
    pub data_url: Option<String>,
}

/// Why a room connection ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The supervisor asked the room to close
    Teardown,
    /// The handler decided the race is over
    RaceFinished,
    /// Unrecoverable failure such as exhausted retries or rejected credentials
    Fatal(String),
}

impl CloseReason {
    /// Metric label for this reason
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::Teardown => "teardown",
            CloseReason::RaceFinished => "race_finished",
            CloseReason::Fatal(_) => "fatal",
        }
    }

    /// Retired rooms are not respawned while discovery still lists them
    pub fn retires_room(&self) -> bool {
        !matches!(self, CloseReason::Teardown)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Teardown => write!(f, "teardown"),
            CloseReason::RaceFinished => write!(f, "race finished"),
            CloseReason::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

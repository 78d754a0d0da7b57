//! Inbound frame parsing
//!
//! Every frame from the server is a JSON object tagged by `type`. Known types
//! map to a closed set of variants; anything else becomes
//! [`InboundFrame::Unknown`] so newer servers never break older bots.

use crate::error::BotError;
use crate::types::{ChatMessage, RaceRoom};
use serde::Deserialize;
use serde_json::Value;

/// Frame types understood by the room connection
pub const RACE_DATA: &str = "race.data";
pub const CHAT_MESSAGE: &str = "chat.message";
pub const CHAT_HISTORY: &str = "chat.history";
pub const ERROR: &str = "error";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    RaceData(Box<RaceRoom>),
    ChatMessage(Box<ChatMessage>),
    ChatHistory(Vec<ChatMessage>),
    Error(Vec<String>),
    Ping,
    Pong,
    Unknown { frame_type: String },
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireFrame {
    #[serde(rename = "race.data")]
    RaceData { race: RaceRoom },
    #[serde(rename = "chat.message")]
    ChatMessage { message: ChatMessage },
    #[serde(rename = "chat.history")]
    ChatHistory {
        #[serde(default)]
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        errors: Vec<String>,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, BotError> {
        let value: Value = serde_json::from_str(text).map_err(|e| BotError::Protocol {
            reason: format!("Frame is not valid JSON: {}", e),
        })?;

        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BotError::Protocol {
                reason: "Frame has no type field".to_string(),
            })?;

        let wire: WireFrame = serde_json::from_value(value).map_err(|e| BotError::Protocol {
            reason: format!("Malformed {} frame: {}", frame_type, e),
        })?;

        Ok(match wire {
            WireFrame::RaceData { mut race } => {
                race.dedup_entrants();
                InboundFrame::RaceData(Box::new(race))
            }
            WireFrame::ChatMessage { message } => InboundFrame::ChatMessage(Box::new(message)),
            WireFrame::ChatHistory { messages } => InboundFrame::ChatHistory(messages),
            WireFrame::Error { errors } => InboundFrame::Error(errors),
            WireFrame::Ping => InboundFrame::Ping,
            WireFrame::Pong => InboundFrame::Pong,
            WireFrame::Unknown => InboundFrame::Unknown { frame_type },
        })
    }

    /// Frame type label used in logs and metrics
    pub fn frame_type(&self) -> &str {
        match self {
            InboundFrame::RaceData(_) => RACE_DATA,
            InboundFrame::ChatMessage(_) => CHAT_MESSAGE,
            InboundFrame::ChatHistory(_) => CHAT_HISTORY,
            InboundFrame::Error(_) => ERROR,
            InboundFrame::Ping => PING,
            InboundFrame::Pong => PONG,
            InboundFrame::Unknown { .. } => "unknown",
        }
    }
}

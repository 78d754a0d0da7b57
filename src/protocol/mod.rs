//! Wire protocol spoken with race room servers
//!
//! Inbound frames are tagged JSON objects (`{"type": ...}`); outbound frames
//! are `{"action": ..., "data": {...}}` envelopes.

pub mod actions;
pub mod frames;
pub mod message_actions;

pub use actions::{ping_frame, InfoMerge, MessageOptions, OutboundMessage, RaceAction};
pub use frames::InboundFrame;
pub use message_actions::{
    Action, ActionLink, MessageAction, Question, QuestionKind, Survey,
};

//! Handle given to handlers for reading room state and queuing outbound
//! frames
//!
//! Sending never touches the network directly: frames go into the room's
//! rate-limited queues and the room task is woken to flush them.

use super::{OversizePolicy, RoomConfig};
use crate::error::{BotError, Result};
use crate::protocol::{InfoMerge, MessageOptions, OutboundMessage, RaceAction};
use crate::rate_limit::{OutboundQueue, QueuedFrame};
use crate::types::{ChatMessage, RaceRoom, RaceSlug};
use crate::utils::truncate_chars;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

/// Which outbound queue a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Message,
    Action,
}

impl FrameKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            FrameKind::Message => "message",
            FrameKind::Action => "action",
        }
    }
}

struct OutboundQueues {
    chat: OutboundQueue,
    actions: OutboundQueue,
}

struct RoomShared {
    race: RwLock<Option<RaceRoom>>,
    chat_log: Mutex<VecDeque<ChatMessage>>,
    outbound: Mutex<OutboundQueues>,
    /// Dropped-frame errors waiting to be reported through `on_error`
    pending_errors: Mutex<Vec<BotError>>,
    wake: Notify,
    /// Set once the room task is gone; only written under the outbound lock
    closed: AtomicBool,
    max_message_length: usize,
    oversize_policy: OversizePolicy,
    history_limit: usize,
}

/// Cloneable view of one race room
#[derive(Clone)]
pub struct RoomHandle {
    slug: RaceSlug,
    shared: Arc<RoomShared>,
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle")
            .field("slug", &self.slug)
            .finish_non_exhaustive()
    }
}

impl RoomHandle {
    pub fn new(slug: impl Into<RaceSlug>, config: &RoomConfig) -> Self {
        let now = Instant::now();
        Self {
            slug: slug.into(),
            shared: Arc::new(RoomShared {
                race: RwLock::new(None),
                chat_log: Mutex::new(VecDeque::new()),
                outbound: Mutex::new(OutboundQueues {
                    chat: OutboundQueue::new(&config.chat_limit, now),
                    actions: OutboundQueue::new(&config.action_limit, now),
                }),
                pending_errors: Mutex::new(Vec::new()),
                wake: Notify::new(),
                closed: AtomicBool::new(false),
                max_message_length: config.max_message_length,
                oversize_policy: config.oversize_policy,
                history_limit: config.history_limit,
            }),
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Latest race snapshot, if one has arrived yet
    pub fn race(&self) -> Option<RaceRoom> {
        self.shared
            .race
            .read()
            .map(|race| race.clone())
            .unwrap_or_default()
    }

    /// Chat messages in receive order, oldest first
    pub fn chat_log(&self) -> Vec<ChatMessage> {
        self.shared
            .chat_log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Queue a plain chat message
    pub fn send_message(&self, text: &str) -> Result<()> {
        self.send_message_with(text, MessageOptions::default())
    }

    /// Queue a chat message with pinning, direct delivery or action buttons
    pub fn send_message_with(&self, text: &str, options: MessageOptions) -> Result<()> {
        let text = self.validate_message(text)?;
        let frame = OutboundMessage::new(text, options).to_frame()?;
        self.enqueue(FrameKind::Message, QueuedFrame::message(frame))
    }

    /// Queue a race action; actions are never dropped silently
    pub fn send_action(&self, action: RaceAction) -> Result<()> {
        let frame = action.to_frame()?;
        self.enqueue(FrameKind::Action, QueuedFrame::action(frame))
    }

    /// Set the bot info line of the race
    pub fn set_bot_info(&self, info: &str) -> Result<()> {
        self.send_action(RaceAction::SetBotInfo(info.to_string()))
    }

    /// Set the user info line, merged with whatever the race currently shows
    pub fn set_user_info(&self, info: &str, merge: InfoMerge) -> Result<()> {
        let existing = self.race().and_then(|race| race.info_user);
        let merged = merge.apply(info, existing.as_deref());
        self.send_action(RaceAction::SetUserInfo(merged))
    }

    /// Whether the room has closed for good; sends fail from then on
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Frames waiting in either queue
    pub fn pending_outbound(&self) -> usize {
        self.shared
            .outbound
            .lock()
            .map(|queues| queues.chat.len() + queues.actions.len())
            .unwrap_or(0)
    }

    /// Serialized frames currently queued, actions first
    pub fn queued_payloads(&self) -> Vec<String> {
        self.shared
            .outbound
            .lock()
            .map(|queues| {
                queues
                    .actions
                    .iter()
                    .chain(queues.chat.iter())
                    .map(|frame| frame.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate_message(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(BotError::InvalidMessage {
                reason: "message is empty".to_string(),
            }
            .into());
        }

        let length = text.chars().count();
        if length <= self.shared.max_message_length {
            return Ok(text.to_string());
        }

        match self.shared.oversize_policy {
            OversizePolicy::Truncate => {
                warn!(
                    "[{}] Truncating message of {} characters to {}",
                    self.slug, length, self.shared.max_message_length
                );
                Ok(truncate_chars(text, self.shared.max_message_length).to_string())
            }
            OversizePolicy::Reject => Err(BotError::InvalidMessage {
                reason: format!(
                    "message is {} characters, limit is {}",
                    length, self.shared.max_message_length
                ),
            }
            .into()),
        }
    }

    fn enqueue(&self, kind: FrameKind, frame: QueuedFrame) -> Result<()> {
        let dropped = {
            let mut queues = self
                .shared
                .outbound
                .lock()
                .map_err(|_| BotError::InternalError {
                    message: "Failed to acquire outbound lock".to_string(),
                })?;
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(BotError::RoomClosed {
                    slug: self.slug.clone(),
                }
                .into());
            }
            let queue = match kind {
                FrameKind::Message => &mut queues.chat,
                FrameKind::Action => &mut queues.actions,
            };
            queue.push(frame)?
        };

        if dropped.is_some() {
            warn!(
                "[{}] Outbound {} queue full, dropped oldest queued frame",
                self.slug,
                kind.label()
            );
            if let Ok(mut errors) = self.shared.pending_errors.lock() {
                errors.push(BotError::RateLimitOverflow {
                    reason: format!("dropped oldest queued {}", kind.label()),
                });
            }
        }

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Refuse further sends and discard anything still queued
    pub(crate) fn mark_closed(&self) {
        let discarded = match self.shared.outbound.lock() {
            Ok(mut queues) => {
                self.shared.closed.store(true, Ordering::SeqCst);
                queues.chat.clear() + queues.actions.clear()
            }
            Err(_) => {
                self.shared.closed.store(true, Ordering::SeqCst);
                0
            }
        };
        if let Ok(mut errors) = self.shared.pending_errors.lock() {
            errors.clear();
        }
        if discarded > 0 {
            warn!(
                "[{}] Discarded {} unsent frames on close",
                self.slug, discarded
            );
        }
    }

    pub(crate) fn replace_race(&self, race: RaceRoom) {
        if let Ok(mut slot) = self.shared.race.write() {
            *slot = Some(race);
        }
    }

    pub(crate) fn push_chat(&self, message: ChatMessage) {
        if let Ok(mut log) = self.shared.chat_log.lock() {
            log.push_back(message);
            while log.len() > self.shared.history_limit {
                log.pop_front();
            }
        }
    }

    /// Replace the chat log with the newest `history_limit` messages
    pub(crate) fn seed_history(&self, messages: Vec<ChatMessage>) {
        if let Ok(mut log) = self.shared.chat_log.lock() {
            let skip = messages.len().saturating_sub(self.shared.history_limit);
            *log = messages.into_iter().skip(skip).collect();
        }
    }

    /// Pop the next frame a token is available for, actions first
    pub(crate) fn pop_ready(&self, now: Instant) -> Option<(FrameKind, String)> {
        let mut queues = self.shared.outbound.lock().ok()?;
        if let Some(frame) = queues.actions.pop_ready(now) {
            return Some((FrameKind::Action, frame.payload));
        }
        queues
            .chat
            .pop_ready(now)
            .map(|frame| (FrameKind::Message, frame.payload))
    }

    /// Earliest instant a queued frame becomes sendable
    pub(crate) fn next_ready_at(&self, now: Instant) -> Option<Instant> {
        let mut queues = self.shared.outbound.lock().ok()?;
        match (
            queues.actions.next_ready_at(now),
            queues.chat.next_ready_at(now),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn take_errors(&self) -> Vec<BotError> {
        self.shared
            .pending_errors
            .lock()
            .map(|mut errors| std::mem::take(&mut *errors))
            .unwrap_or_default()
    }

    /// Resolves once something has been queued since the last wait
    pub(crate) async fn outbound_ready(&self) {
        self.shared.wake.notified().await;
    }
}

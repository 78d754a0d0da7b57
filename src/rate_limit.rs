//! Outbound rate limiting for room connections
//!
//! Each room owns two [`OutboundQueue`]s, one for chat and one for race
//! actions, each throttled by its own [`TokenBucket`]. Frames leave a queue
//! strictly in submission order.

use crate::error::BotError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

/// Slack for floating point refill arithmetic
const TOKEN_EPSILON: f64 = 1e-9;

/// What to do when a queue is already at its maximum depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest non-critical queued frame to make room
    DropOldest,
    /// Refuse the new frame
    RejectNew,
}

/// Configuration for one outbound queue
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Burst size
    pub capacity: u32,
    /// Sustained rate in tokens per second
    pub refill_per_second: f64,
    pub max_queue_depth: usize,
    pub overflow: OverflowPolicy,
}

impl RateLimitConfig {
    /// Chat defaults mirroring the server's limits: burst 3, 1 message/s
    pub fn chat() -> Self {
        Self {
            capacity: 3,
            refill_per_second: 1.0,
            max_queue_depth: 20,
            overflow: OverflowPolicy::DropOldest,
        }
    }

    /// Race actions are less restricted than chat
    pub fn actions() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 5.0,
            max_queue_depth: 20,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Classic token bucket driven by an explicit clock
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: u32, refill_per_second: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_second,
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// Currently available tokens
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Take one token if available
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// How long until one token is available
    pub fn time_until_available(&mut self, now: Instant) -> Duration {
        self.refill(now);
        let missing = 1.0 - self.tokens;
        if missing <= TOKEN_EPSILON || self.refill_per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(missing / self.refill_per_second)
    }
}

/// A serialized frame waiting for a token
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedFrame {
    pub payload: String,
    /// Critical frames are never evicted by `DropOldest`
    pub critical: bool,
}

impl QueuedFrame {
    pub fn message(payload: String) -> Self {
        Self {
            payload,
            critical: false,
        }
    }

    pub fn action(payload: String) -> Self {
        Self {
            payload,
            critical: true,
        }
    }
}

/// FIFO queue of outbound frames gated by a token bucket
#[derive(Debug)]
pub struct OutboundQueue {
    bucket: TokenBucket,
    queue: VecDeque<QueuedFrame>,
    max_depth: usize,
    overflow: OverflowPolicy,
}

impl OutboundQueue {
    pub fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(config.capacity, config.refill_per_second, now),
            queue: VecDeque::new(),
            max_depth: config.max_queue_depth.max(1),
            overflow: config.overflow,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything queued, returning how many frames were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }

    /// Queued frames in send order
    pub fn iter(&self) -> impl Iterator<Item = &QueuedFrame> {
        self.queue.iter()
    }

    /// Queue a frame, returning the frame evicted to make room if any
    pub fn push(&mut self, frame: QueuedFrame) -> Result<Option<QueuedFrame>, BotError> {
        if self.queue.len() < self.max_depth {
            self.queue.push_back(frame);
            return Ok(None);
        }

        match self.overflow {
            OverflowPolicy::DropOldest => {
                let Some(index) = self.queue.iter().position(|queued| !queued.critical) else {
                    return Err(BotError::RateLimitOverflow {
                        reason: format!(
                            "queue full with {} critical frames pending",
                            self.queue.len()
                        ),
                    });
                };
                let dropped = self.queue.remove(index);
                self.queue.push_back(frame);
                Ok(dropped)
            }
            OverflowPolicy::RejectNew => Err(BotError::RateLimitOverflow {
                reason: format!("queue depth {} reached", self.max_depth),
            }),
        }
    }

    /// Pop the head of the queue if a token is available
    pub fn pop_ready(&mut self, now: Instant) -> Option<QueuedFrame> {
        if self.queue.is_empty() || !self.bucket.try_acquire(now) {
            return None;
        }
        self.queue.pop_front()
    }

    /// When the head of the queue can next be sent, `None` if nothing is queued
    pub fn next_ready_at(&mut self, now: Instant) -> Option<Instant> {
        if self.queue.is_empty() {
            return None;
        }
        Some(now + self.bucket.time_until_available(now))
    }
}

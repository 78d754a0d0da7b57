//! Room connection state machine
//!
//! One [`RoomConnection`] runs per supervised room inside its own task. It
//! owns the transport channel and the handler, so handler calls for a room
//! are naturally serialized. The loop multiplexes, in priority order: the
//! shutdown signal, inbound frames, newly queued outbound frames, rate-limit
//! deadlines and the keepalive timer.

use super::handle::RoomHandle;
use super::state::{ConnectionState, ConnectionStatus};
use super::RoomConfig;
use crate::backoff::BackoffPolicy;
use crate::error::{is_fatal, BotError, Result};
use crate::handler::{Command, RaceHandler};
use crate::metrics::MetricsCollector;
use crate::protocol::{ping_frame, InboundFrame};
use crate::transport::{Channel, Transport};
use crate::types::CloseReason;
use crate::utils::shutdown_requested;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Channels linking a room task to its supervisor
pub struct RoomSignals {
    /// Published on every state transition
    pub state: watch::Sender<ConnectionState>,
    /// Flips to `true` when the room should close
    pub shutdown: watch::Receiver<bool>,
}

enum ConnectOutcome {
    Connected(Box<dyn Channel>),
    Failed(anyhow::Error),
    Fatal(String),
    Shutdown,
}

enum SessionEnd {
    /// Close gracefully over the still-open channel
    Close(CloseReason),
    /// Reconnect after backoff
    Failed(anyhow::Error),
}

/// Drives a single room from first connect until it is closed
pub struct RoomConnection {
    handle: RoomHandle,
    url: String,
    handler: Box<dyn RaceHandler>,
    config: RoomConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsCollector>,
    backoff: BackoffPolicy,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
    last_activity: Option<Instant>,
    history_seeded: bool,
}

impl RoomConnection {
    pub fn new(
        handle: RoomHandle,
        url: impl Into<String>,
        handler: Box<dyn RaceHandler>,
        config: RoomConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsCollector>,
        signals: RoomSignals,
    ) -> Self {
        let backoff = BackoffPolicy::new(config.backoff.clone());
        Self {
            handle,
            url: url.into(),
            handler,
            config,
            transport,
            metrics,
            backoff,
            state: signals.state,
            shutdown: signals.shutdown,
            last_activity: None,
            history_seeded: false,
        }
    }

    pub fn slug(&self) -> &str {
        self.handle.slug()
    }

    /// Run until the room closes, returning why it closed
    pub async fn run(mut self) -> CloseReason {
        info!("[{}] Room task started for {}", self.slug(), self.url);

        let reason = loop {
            self.publish(ConnectionStatus::Connecting, None);

            match self.connect().await {
                ConnectOutcome::Connected(mut channel) => {
                    let opened_at = Instant::now();
                    let end = self.session(channel.as_mut()).await;

                    let open_for = opened_at.elapsed();
                    self.metrics.record_session(open_for);
                    if self.backoff.should_reset(open_for) {
                        self.backoff.reset();
                    }

                    match end {
                        SessionEnd::Close(reason) => {
                            break self.close_gracefully(Some(channel.as_mut()), reason).await;
                        }
                        SessionEnd::Failed(e) => {
                            warn!("[{}] Session failed: {:#}", self.slug(), e);
                        }
                    }
                }
                ConnectOutcome::Failed(e) => {
                    warn!("[{}] Connect failed: {:#}", self.slug(), e);
                }
                ConnectOutcome::Fatal(reason) => {
                    break self.close_fatal(reason).await;
                }
                ConnectOutcome::Shutdown => {
                    break self.close_gracefully(None, CloseReason::Teardown).await;
                }
            }

            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempt();
                break self
                    .close_fatal(format!("gave up after {} failed attempts", attempts))
                    .await;
            };

            self.metrics.record_reconnect();
            let retry_at = Instant::now() + delay;
            self.publish(ConnectionStatus::Reconnecting, Some(retry_at));
            info!(
                "[{}] Reconnecting in {:?} (attempt {})",
                self.slug(),
                delay,
                self.backoff.attempt()
            );

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    break self.close_gracefully(None, CloseReason::Teardown).await;
                }
                _ = sleep_until(retry_at) => {}
            }
        };

        self.handle.mark_closed();
        self.publish(ConnectionStatus::Closed, None);
        info!("[{}] Room closed: {}", self.slug(), reason);
        reason
    }

    async fn connect(&mut self) -> ConnectOutcome {
        let attempt = timeout(self.config.connect_timeout, self.transport.connect(&self.url));

        let result = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => return ConnectOutcome::Shutdown,
            result = attempt => result,
        };

        match result {
            Ok(Ok(channel)) => ConnectOutcome::Connected(channel),
            Ok(Err(e)) if is_fatal(&e) => ConnectOutcome::Fatal(e.to_string()),
            Ok(Err(e)) => ConnectOutcome::Failed(e),
            Err(_) => ConnectOutcome::Failed(
                BotError::Transport {
                    message: format!("connect timed out after {:?}", self.config.connect_timeout),
                }
                .into(),
            ),
        }
    }

    async fn session(&mut self, channel: &mut dyn Channel) -> SessionEnd {
        self.history_seeded = false;
        self.last_activity = Some(Instant::now());
        self.publish(ConnectionStatus::Open, None);
        info!("[{}] Connected", self.slug());

        let result = self.handler.on_open(&self.handle).await;
        self.check_hook("on_open", result);

        let mut ping_sent_at: Option<Instant> = None;

        loop {
            if let Err(e) = self.flush(channel).await {
                return SessionEnd::Failed(e);
            }
            self.report_dropped_frames().await;

            let now = Instant::now();
            let keepalive_deadline = match ping_sent_at {
                Some(sent) => sent + self.config.keepalive_response,
                None => self.last_activity.unwrap_or(now) + self.config.keepalive_idle,
            };
            let outbound_deadline = self.handle.next_ready_at(now);

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    return SessionEnd::Close(CloseReason::Teardown);
                }
                frame = channel.receive() => {
                    let text = match frame {
                        Some(Ok(text)) => text,
                        Some(Err(e)) => return SessionEnd::Failed(e),
                        None => {
                            return SessionEnd::Failed(
                                BotError::Transport {
                                    message: "connection closed by server".to_string(),
                                }
                                .into(),
                            )
                        }
                    };

                    self.last_activity = Some(Instant::now());
                    ping_sent_at = None;
                    self.publish(ConnectionStatus::Open, None);

                    if let Some(reason) = self.handle_frame(&text).await {
                        return SessionEnd::Close(reason);
                    }
                }
                _ = self.handle.outbound_ready() => {}
                _ = sleep_until(outbound_deadline.unwrap_or(now)), if outbound_deadline.is_some() => {}
                _ = sleep_until(keepalive_deadline) => {
                    if ping_sent_at.is_some() {
                        return SessionEnd::Failed(
                            BotError::Transport {
                                message: format!(
                                    "no frame within {:?} of keepalive ping",
                                    self.config.keepalive_response
                                ),
                            }
                            .into(),
                        );
                    }

                    debug!("[{}] Idle, sending keepalive ping", self.slug());
                    if let Err(e) = channel.send(ping_frame()).await {
                        return SessionEnd::Failed(e);
                    }
                    self.metrics.record_outbound_sent("ping");
                    ping_sent_at = Some(Instant::now());
                }
            }
        }
    }

    /// Parse and dispatch one inbound frame, returning a close reason when
    /// the handler is done with the room
    async fn handle_frame(&mut self, text: &str) -> Option<CloseReason> {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[{}] Dropping frame: {}", self.slug(), e);
                self.metrics.record_frame_dropped();
                return None;
            }
        };
        self.metrics.record_frame_received(frame.frame_type());

        match frame {
            InboundFrame::RaceData(race) => {
                self.handle.replace_race((*race).clone());
                let result = self.handler.on_race_data(&self.handle, &race).await;
                self.check_hook("on_race_data", result);
            }
            InboundFrame::ChatMessage(message) => {
                self.handle.push_chat((*message).clone());
                match Command::from_message(&message, &self.config.command_prefix) {
                    Some(command) => {
                        debug!("[{}] Command !{}", self.slug(), command.verb);
                        let result = self
                            .handler
                            .on_command(&self.handle, &command, &message)
                            .await;
                        self.check_hook("on_command", result);
                    }
                    None => {
                        let result = self.handler.on_chat_message(&self.handle, &message).await;
                        self.check_hook("on_chat_message", result);
                    }
                }
            }
            InboundFrame::ChatHistory(messages) => {
                if self.history_seeded {
                    debug!("[{}] Ignoring repeated chat history", self.slug());
                } else {
                    debug!("[{}] Seeding {} history messages", self.slug(), messages.len());
                    self.handle.seed_history(messages);
                    self.history_seeded = true;
                }
            }
            InboundFrame::Error(errors) => {
                warn!("[{}] Server error: {}", self.slug(), errors.join("; "));
                let error = BotError::Server { errors };
                let result = self.handler.on_error(&self.handle, &error).await;
                self.check_hook("on_error", result);
            }
            InboundFrame::Ping | InboundFrame::Pong => {}
            InboundFrame::Unknown { frame_type } => {
                debug!("[{}] Ignoring unknown frame type {}", self.slug(), frame_type);
            }
        }

        let race = self.handle.race()?;
        if self.handler.should_stop(&race) {
            info!("[{}] Race is {}, closing room", self.slug(), race.status());
            return Some(CloseReason::RaceFinished);
        }
        None
    }

    /// Send every queued frame a token is available for
    async fn flush(&mut self, channel: &mut dyn Channel) -> Result<()> {
        while let Some((kind, payload)) = self.handle.pop_ready(Instant::now()) {
            channel.send(payload).await?;
            self.metrics.record_outbound_sent(kind.label());
        }
        Ok(())
    }

    async fn report_dropped_frames(&mut self) {
        for error in self.handle.take_errors() {
            self.metrics.record_outbound_dropped("message");
            let result = self.handler.on_error(&self.handle, &error).await;
            self.check_hook("on_error", result);
        }
    }

    async fn close_gracefully(
        &mut self,
        channel: Option<&mut dyn Channel>,
        reason: CloseReason,
    ) -> CloseReason {
        self.publish(ConnectionStatus::Closing, None);
        info!("[{}] Closing ({})", self.slug(), reason);

        let result = self.handler.on_close(&self.handle, &reason).await;
        self.check_hook("on_close", result);
        self.report_dropped_frames().await;

        if let Some(channel) = channel {
            let close_timeout = self.config.close_timeout;
            let closing = async {
                self.flush(channel).await?;
                channel.close().await
            };
            match timeout(close_timeout, closing).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("[{}] Error while closing: {:#}", self.slug(), e),
                Err(_) => warn!(
                    "[{}] Close did not finish within {:?}",
                    self.slug(),
                    close_timeout
                ),
            }
        }

        reason
    }

    async fn close_fatal(&mut self, reason: String) -> CloseReason {
        warn!("[{}] Fatal: {}", self.slug(), reason);
        let reason = CloseReason::Fatal(reason);
        let result = self.handler.on_close(&self.handle, &reason).await;
        self.check_hook("on_close", result);
        reason
    }

    fn check_hook(&self, hook: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!("[{}] Handler {} failed: {:#}", self.slug(), hook, e);
            self.metrics.record_handler_error(hook);
        }
    }

    fn publish(&self, status: ConnectionStatus, next_retry_at: Option<Instant>) {
        self.state.send_replace(ConnectionState {
            status,
            last_activity: self.last_activity,
            retry_count: self.backoff.attempt(),
            next_retry_at,
        });
    }
}

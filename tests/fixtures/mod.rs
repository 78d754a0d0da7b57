//! Test fixtures: a scripted in-memory transport, a recording handler and
//! frame builders for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use racetime_bot::discovery::RaceDiscovery;
use racetime_bot::error::{BotError, Result};
use racetime_bot::handler::{Command, HandlerFactory, RaceHandler};
use racetime_bot::metrics::MetricsCollector;
use racetime_bot::room::{ConnectionStatus, RoomHandle};
use racetime_bot::supervisor::{Supervisor, SupervisorConfig};
use racetime_bot::transport::{Channel, Transport};
use racetime_bot::types::{ChatMessage, CloseReason, RaceRoom, RaceStatus, RaceSummary};
use racetime_bot::RoomConfig;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How the next connect attempt behaves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectPlan {
    /// Transient failure; the room backs off and retries
    Fail,
    /// Credentials rejected; the room closes for good
    Reject,
    /// Channel opens
    Open,
}

#[derive(Default)]
struct TransportLog {
    plans: VecDeque<ConnectPlan>,
    attempts: Vec<(String, Instant)>,
    sent: Vec<(Instant, String)>,
    servers: Vec<mpsc::UnboundedSender<String>>,
    closed: usize,
}

/// In-memory transport whose connect results are scripted up front
///
/// Once the script runs out every connect opens a channel. Frames for an
/// open channel are injected through [`MockTransport::push`]; dropping the
/// server side with [`MockTransport::hang_up`] ends the session.
#[derive(Clone, Default)]
pub struct MockTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(plans: Vec<ConnectPlan>) -> Self {
        let transport = Self::new();
        transport.log.lock().unwrap().plans = plans.into();
        transport
    }

    /// Times of every connect attempt
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.log
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn attempts_for(&self, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|(attempted, _)| attempted == url)
            .count()
    }

    /// Number of channels opened so far
    pub fn opened(&self) -> usize {
        self.log.lock().unwrap().servers.len()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }

    /// Every frame sent by any room, with its send time
    pub fn sent(&self) -> Vec<(Instant, String)> {
        self.log.lock().unwrap().sent.clone()
    }

    /// Sent frames parsed as JSON, excluding keepalive pings
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter_map(|(_, text)| serde_json::from_str::<serde_json::Value>(&text).ok())
            .filter(|frame| frame["action"] != "ping")
            .collect()
    }

    pub fn pings_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|(_, text)| text.contains("\"ping\""))
            .count()
    }

    /// Deliver a frame on the most recently opened channel
    pub fn push(&self, frame: impl Into<String>) {
        let log = self.log.lock().unwrap();
        let server = log.servers.last().expect("no channel has been opened");
        let _ = server.send(frame.into());
    }

    /// Close the most recently opened channel from the server side
    pub fn hang_up(&self) {
        let mut log = self.log.lock().unwrap();
        if let Some(server) = log.servers.last_mut() {
            let (replacement, _) = mpsc::unbounded_channel();
            *server = replacement;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Channel>> {
        let mut log = self.log.lock().unwrap();
        log.attempts.push((url.to_string(), Instant::now()));

        match log.plans.pop_front().unwrap_or(ConnectPlan::Open) {
            ConnectPlan::Fail => Err(BotError::Transport {
                message: "connection refused".to_string(),
            }
            .into()),
            ConnectPlan::Reject => Err(BotError::Fatal {
                reason: "handshake rejected with HTTP 401".to_string(),
            }
            .into()),
            ConnectPlan::Open => {
                let (tx, rx) = mpsc::unbounded_channel();
                log.servers.push(tx);
                Ok(Box::new(MockChannel {
                    inbound: rx,
                    log: self.log.clone(),
                }))
            }
        }
    }
}

struct MockChannel {
    inbound: mpsc::UnboundedReceiver<String>,
    log: Arc<Mutex<TransportLog>>,
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&mut self, text: String) -> Result<()> {
        self.log.lock().unwrap().sent.push((Instant::now(), text));
        Ok(())
    }

    async fn receive(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// What a [`RecordingHandler`] saw, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open,
    RaceData(RaceStatus),
    Chat(String),
    Command(String, Vec<String>),
    Error(String),
    Close(CloseReason),
}

type EventLog = Arc<Mutex<HashMap<String, Vec<Event>>>>;

/// Handler that records every call and answers `!ping` with `pong`
pub struct RecordingHandler {
    slug: String,
    events: EventLog,
}

impl RecordingHandler {
    fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap()
            .entry(self.slug.clone())
            .or_default()
            .push(event);
    }
}

#[async_trait]
impl RaceHandler for RecordingHandler {
    async fn on_open(&mut self, _room: &RoomHandle) -> Result<()> {
        self.record(Event::Open);
        Ok(())
    }

    async fn on_race_data(&mut self, _room: &RoomHandle, race: &RaceRoom) -> Result<()> {
        self.record(Event::RaceData(race.status()));
        Ok(())
    }

    async fn on_chat_message(&mut self, _room: &RoomHandle, message: &ChatMessage) -> Result<()> {
        self.record(Event::Chat(message.text.clone()));
        Ok(())
    }

    async fn on_command(
        &mut self,
        room: &RoomHandle,
        command: &Command,
        _message: &ChatMessage,
    ) -> Result<()> {
        self.record(Event::Command(command.verb.clone(), command.args.clone()));
        match command.verb.as_str() {
            "ping" => room.send_message("pong"),
            "spam" => {
                for i in 0..5 {
                    room.send_message(&format!("line {}", i))?;
                }
                Ok(())
            }
            "fail" => Err(anyhow::anyhow!("handler failure")),
            _ => Ok(()),
        }
    }

    async fn on_error(&mut self, _room: &RoomHandle, error: &BotError) -> Result<()> {
        self.record(Event::Error(error.to_string()));
        Ok(())
    }

    async fn on_close(&mut self, _room: &RoomHandle, reason: &CloseReason) -> Result<()> {
        self.record(Event::Close(reason.clone()));
        Ok(())
    }
}

/// Builds [`RecordingHandler`]s that share one event log
#[derive(Clone, Default)]
pub struct RecordingFactory {
    events: EventLog,
    created: Arc<AtomicUsize>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self, slug: &str) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .get(slug)
            .cloned()
            .unwrap_or_default()
    }

    /// Handlers created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl HandlerFactory for RecordingFactory {
    fn create(&self, slug: &str) -> Box<dyn RaceHandler> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingHandler {
            slug: slug.to_string(),
            events: self.events.clone(),
        })
    }
}

/// Room settings with jitter removed so timings are exact
pub fn test_room_config() -> RoomConfig {
    let mut config = RoomConfig::default();
    config.backoff.jitter = std::time::Duration::ZERO;
    config
}

/// Supervisor over a mock transport with a recording handler
pub fn test_supervisor(
    transport: &MockTransport,
    factory: &RecordingFactory,
    room_config: RoomConfig,
) -> (Supervisor, Arc<MetricsCollector>) {
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let supervisor = Supervisor::new(
        Arc::new(factory.clone()),
        Arc::new(transport.clone()),
        room_config,
        SupervisorConfig::default(),
        metrics.clone(),
    );
    (supervisor, metrics)
}

/// A `race.data` frame
pub fn race_data_frame(slug: &str, status: &str) -> String {
    json!({
        "type": "race.data",
        "race": {
            "name": slug,
            "status": {"value": status, "verbose_value": status},
            "goal": {"name": "Any%", "custom": false},
            "entrants": [
                {"user": {"id": "u1", "name": "runner"}, "status": {"value": "joined"}}
            ],
            "info": null,
            "opened_at": "2026-10-19T12:00:00Z"
        }
    })
    .to_string()
}

/// A `chat.message` frame from a regular user
pub fn chat_frame(id: &str, text: &str) -> String {
    json!({
        "type": "chat.message",
        "message": {
            "id": id,
            "user": {"id": "u1", "name": "runner"},
            "bot": null,
            "message": text,
            "posted_at": "2026-10-19T12:00:00Z",
            "is_bot": false,
            "is_system": false
        }
    })
    .to_string()
}

/// A `chat.history` frame
pub fn chat_history_frame(texts: &[&str]) -> String {
    let messages: Vec<serde_json::Value> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            json!({
                "id": format!("h{}", i),
                "user": {"id": "u2", "name": "viewer"},
                "message": text,
                "posted_at": "2026-10-19T11:00:00Z"
            })
        })
        .collect();
    json!({"type": "chat.history", "messages": messages}).to_string()
}

/// An `error` frame
pub fn error_frame(errors: &[&str]) -> String {
    json!({"type": "error", "errors": errors}).to_string()
}

/// Let spawned room tasks run until they block again
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Discovery that replays scripted listings; the last listing repeats
#[derive(Default)]
pub struct ScriptedDiscovery {
    listings: Mutex<VecDeque<Vec<RaceSummary>>>,
    last: Mutex<Vec<RaceSummary>>,
}

impl ScriptedDiscovery {
    pub fn new(listings: Vec<Vec<RaceSummary>>) -> Self {
        Self {
            listings: Mutex::new(listings.into()),
            last: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RaceDiscovery for ScriptedDiscovery {
    async fn list_active(&self, _category: &str) -> Result<Vec<RaceSummary>> {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.listings.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    async fn room_url(&self, race: &RaceSummary) -> Result<String> {
        Ok(room_url(&race.slug))
    }
}

pub fn room_url(slug: &str) -> String {
    format!("ws://race.test/ws/o/bot/{}", slug)
}

pub fn summary(slug: &str, status: RaceStatus) -> RaceSummary {
    RaceSummary {
        slug: slug.to_string(),
        status,
        data_url: None,
    }
}

/// Wait until a room publishes the given status
pub async fn wait_for_status(supervisor: &Supervisor, slug: &str, status: ConnectionStatus) {
    let mut rx = supervisor
        .watch_state(slug)
        .await
        .expect("room is not supervised");
    tokio::time::timeout(
        std::time::Duration::from_secs(300),
        rx.wait_for(|state| state.status == status),
    )
    .await
    .expect("timed out waiting for room status")
    .expect("room task ended");
}

/// Wait until the supervisor no longer tracks a room
pub async fn wait_until_removed(supervisor: &Supervisor, slug: &str) {
    for _ in 0..1000 {
        if supervisor.state(slug).await.is_none() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("room {} was never removed", slug);
}

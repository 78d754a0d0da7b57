//! Connection supervisor
//!
//! Keeps exactly one room task per tracked slug. Every change to the room map
//! goes through a single async mutex, which is what makes `spawn` idempotent
//! under concurrent callers. Room tasks report back when they finish; an
//! entry is only removed by the task generation that created it.

use crate::error::{BotError, Result};
use crate::handler::HandlerFactory;
use crate::metrics::MetricsCollector;
use crate::room::connection::RoomSignals;
use crate::room::{ConnectionState, RoomConfig, RoomConnection, RoomHandle};
use crate::transport::Transport;
use crate::types::{CloseReason, RaceSlug};
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Supervisor-wide limits
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Spawns beyond this many rooms are refused
    pub max_concurrent_rooms: usize,
    /// How long rooms get to close before they are aborted
    pub close_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rooms: 100,
            close_grace: Duration::from_secs(10),
        }
    }
}

/// Statistics about supervisor operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupervisorStats {
    /// Total room tasks spawned
    pub rooms_spawned: u64,
    /// Rooms closed on request
    pub rooms_torn_down: u64,
    /// Rooms closed because the race was over
    pub rooms_finished: u64,
    /// Rooms closed by a fatal failure
    pub rooms_failed: u64,
    /// Spawns refused at the room limit
    pub spawns_refused: u64,
    /// Current number of supervised rooms
    pub active_rooms: usize,
}

/// Result of a spawn request
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnOutcome {
    Spawned,
    AlreadyRunning,
    /// The room ended for good earlier and is not respawned
    Retired(CloseReason),
    AtCapacity,
    ShuttingDown,
}

struct RoomEntry {
    generation: u64,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    /// Taken by whoever waits for the task to finish
    task: Option<JoinHandle<()>>,
    handle: RoomHandle,
}

#[derive(Default)]
struct SupervisorState {
    rooms: HashMap<RaceSlug, RoomEntry>,
    retired: HashMap<RaceSlug, CloseReason>,
}

/// Owns every room task
#[derive(Clone)]
pub struct Supervisor {
    state: Arc<Mutex<SupervisorState>>,
    factory: Arc<dyn HandlerFactory>,
    transport: Arc<dyn Transport>,
    room_config: RoomConfig,
    config: SupervisorConfig,
    stats: Arc<RwLock<SupervisorStats>>,
    metrics_collector: Arc<MetricsCollector>,
    next_generation: Arc<AtomicU64>,
    accepting: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(
        factory: Arc<dyn HandlerFactory>,
        transport: Arc<dyn Transport>,
        room_config: RoomConfig,
        config: SupervisorConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SupervisorState::default())),
            factory,
            transport,
            room_config,
            config,
            stats: Arc::new(RwLock::new(SupervisorStats::default())),
            metrics_collector,
            next_generation: Arc::new(AtomicU64::new(1)),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Start a room task for `slug` unless one is already running
    pub async fn spawn(&self, slug: &str, url: &str) -> Result<SpawnOutcome> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Ok(SpawnOutcome::ShuttingDown);
        }

        let mut state = self.state.lock().await;

        if state.rooms.contains_key(slug) {
            return Ok(SpawnOutcome::AlreadyRunning);
        }
        if let Some(reason) = state.retired.get(slug) {
            debug!("[{}] Not respawning retired room ({})", slug, reason);
            return Ok(SpawnOutcome::Retired(reason.clone()));
        }
        if state.rooms.len() >= self.config.max_concurrent_rooms {
            warn!(
                "[{}] Refusing room, limit of {} rooms reached",
                slug, self.config.max_concurrent_rooms
            );
            self.update_stats(|stats| stats.spawns_refused += 1)?;
            self.metrics_collector.record_room_refused();
            return Ok(SpawnOutcome::AtCapacity);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let handle = RoomHandle::new(slug, &self.room_config);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = RoomConnection::new(
            handle.clone(),
            url,
            self.factory.create(slug),
            self.room_config.clone(),
            self.transport.clone(),
            self.metrics_collector.clone(),
            RoomSignals {
                state: state_tx,
                shutdown: shutdown_rx,
            },
        );

        let supervisor = self.clone();
        let task_slug = slug.to_string();
        let task = tokio::spawn(async move {
            let reason = connection.run().await;
            supervisor.finish_room(&task_slug, generation, reason).await;
        });

        state.rooms.insert(
            slug.to_string(),
            RoomEntry {
                generation,
                state: state_rx,
                shutdown: shutdown_tx,
                task: Some(task),
                handle,
            },
        );
        let active = state.rooms.len();
        drop(state);

        self.update_stats(|stats| {
            stats.rooms_spawned += 1;
            stats.active_rooms = active;
        })?;
        self.metrics_collector.record_room_spawned();
        info!("[{}] Spawned room task (generation {})", slug, generation);

        Ok(SpawnOutcome::Spawned)
    }

    /// Close a room gracefully and remove it; returns false if it was not
    /// supervised
    pub async fn teardown(&self, slug: &str) -> Result<bool> {
        let (generation, task) = {
            let mut state = self.state.lock().await;
            let Some(entry) = state.rooms.get_mut(slug) else {
                return Ok(false);
            };
            entry.shutdown.send_replace(true);
            (entry.generation, entry.task.take())
        };

        info!("[{}] Tearing down room", slug);

        let Some(mut task) = task else {
            // Someone else is already waiting for this task
            return Ok(true);
        };

        if timeout(self.config.close_grace, &mut task).await.is_err() {
            warn!(
                "[{}] Room did not close within {:?}, aborting",
                slug, self.config.close_grace
            );
            task.abort();
            self.finish_room(slug, generation, CloseReason::Teardown)
                .await;
        }

        Ok(true)
    }

    /// Tear down every room, aborting whatever outlives the grace window
    pub async fn shutdown(&self) -> Result<()> {
        self.accepting.store(false, Ordering::SeqCst);

        let mut tasks = Vec::new();
        {
            let mut state = self.state.lock().await;
            for (slug, entry) in state.rooms.iter_mut() {
                entry.shutdown.send_replace(true);
                if let Some(task) = entry.task.take() {
                    tasks.push((slug.clone(), entry.generation, task));
                }
            }
        }

        info!("Shutting down {} rooms", tasks.len());

        let waits = join_all(tasks.iter_mut().map(|(_, _, task)| task));
        if timeout(self.config.close_grace, waits).await.is_err() {
            for (slug, generation, task) in &tasks {
                if !task.is_finished() {
                    warn!("[{}] Room did not close in time, aborting", slug);
                    task.abort();
                    self.finish_room(slug, *generation, CloseReason::Teardown)
                        .await;
                }
            }
        }

        let remaining = self.state.lock().await.rooms.len();
        if remaining > 0 {
            warn!("{} rooms still closing after shutdown", remaining);
        } else {
            info!("All rooms closed");
        }
        Ok(())
    }

    /// Forget retirements for slugs discovery no longer lists
    pub async fn prune_retired(&self, listed: &HashSet<RaceSlug>) {
        let mut state = self.state.lock().await;
        state.retired.retain(|slug, _| {
            let keep = listed.contains(slug);
            if !keep {
                debug!("[{}] Forgetting retired room", slug);
            }
            keep
        });
    }

    /// Remove a finished room, recording why it ended
    async fn finish_room(&self, slug: &str, generation: u64, reason: CloseReason) {
        let mut state = self.state.lock().await;

        let owned = state
            .rooms
            .get(slug)
            .is_some_and(|entry| entry.generation == generation);
        if !owned {
            debug!(
                "[{}] Stale finish from generation {}, ignoring",
                slug, generation
            );
            return;
        }

        if let Some(entry) = state.rooms.remove(slug) {
            entry.handle.mark_closed();
        }
        if reason.retires_room() {
            state.retired.insert(slug.to_string(), reason.clone());
        }
        let active = state.rooms.len();
        drop(state);

        let recorded = self.update_stats(|stats| {
            match &reason {
                CloseReason::Teardown => stats.rooms_torn_down += 1,
                CloseReason::RaceFinished => stats.rooms_finished += 1,
                CloseReason::Fatal(_) => stats.rooms_failed += 1,
            }
            stats.active_rooms = active;
        });
        if let Err(e) = recorded {
            warn!("[{}] Failed to record room stats: {}", slug, e);
        }
        self.metrics_collector.record_room_closed(&reason);
    }

    fn update_stats(&self, update: impl FnOnce(&mut SupervisorStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| BotError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }

    /// Slugs currently supervised, sorted
    pub async fn rooms(&self) -> Vec<RaceSlug> {
        let state = self.state.lock().await;
        let mut slugs: Vec<RaceSlug> = state.rooms.keys().cloned().collect();
        slugs.sort();
        slugs
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.len()
    }

    /// Latest published state of a room
    pub async fn state(&self, slug: &str) -> Option<ConnectionState> {
        let state = self.state.lock().await;
        state.rooms.get(slug).map(|entry| entry.state.borrow().clone())
    }

    /// Latest published state of every room
    pub async fn states(&self) -> HashMap<RaceSlug, ConnectionState> {
        let state = self.state.lock().await;
        state
            .rooms
            .iter()
            .map(|(slug, entry)| (slug.clone(), entry.state.borrow().clone()))
            .collect()
    }

    /// Subscribe to state changes of a room
    pub async fn watch_state(&self, slug: &str) -> Option<watch::Receiver<ConnectionState>> {
        let state = self.state.lock().await;
        state.rooms.get(slug).map(|entry| entry.state.clone())
    }

    /// Handle of a supervised room
    pub async fn handle(&self, slug: &str) -> Option<RoomHandle> {
        let state = self.state.lock().await;
        state.rooms.get(slug).map(|entry| entry.handle.clone())
    }

    /// Why a retired room ended, if it is retired
    pub async fn retired_reason(&self, slug: &str) -> Option<CloseReason> {
        self.state.lock().await.retired.get(slug).cloned()
    }

    /// Get supervisor statistics
    pub fn stats(&self) -> SupervisorStats {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

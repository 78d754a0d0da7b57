//! Main service state and coordination
//!
//! [`BotService`] wires the configured discovery, transport, supervisor and
//! poller together and owns the background tasks that keep them running.

use crate::config::AppConfig;
use crate::discovery::{DiscoveryPoller, HttpRaceDiscovery, RaceDiscovery};
use crate::handler::HandlerFactory;
use crate::metrics::MetricsCollector;
use crate::supervisor::Supervisor;
use crate::transport::{Transport, WebSocketTransport};
use crate::utils::shutdown_requested;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// The running bot: discovery poller plus supervised rooms
pub struct BotService {
    config: AppConfig,

    discovery: Arc<dyn RaceDiscovery>,

    supervisor: Supervisor,

    metrics_collector: Arc<MetricsCollector>,

    /// Stops the poller and the stats task
    shutdown_tx: watch::Sender<bool>,

    background_tasks: Vec<JoinHandle<()>>,

    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl BotService {
    /// Build the service with the HTTP discovery and WebSocket transport
    pub fn new(config: AppConfig, factory: Arc<dyn HandlerFactory>) -> Result<Self, ServiceError> {
        info!("Initializing {} service", config.service.name);
        info!(
            "Configuration: host={}, secure={}, category={}",
            config.server.host, config.server.secure, config.server.category
        );

        let discovery = HttpRaceDiscovery::new(
            config.server.host.clone(),
            config.server.secure,
            config.request_timeout(),
        )
        .map_err(|e| ServiceError::Initialization {
            message: format!("Failed to create race discovery: {}", e),
        })?;

        let transport = WebSocketTransport::new(config.server.access_token.clone());

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        Self::with_collaborators(
            config,
            factory,
            Arc::new(discovery),
            Arc::new(transport),
            metrics_collector,
        )
    }

    /// Build the service around caller-provided collaborators
    pub fn with_collaborators(
        config: AppConfig,
        factory: Arc<dyn HandlerFactory>,
        discovery: Arc<dyn RaceDiscovery>,
        transport: Arc<dyn Transport>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Self, ServiceError> {
        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let supervisor = Supervisor::new(
            factory,
            transport,
            config.room_config(),
            config.supervisor_config(),
            metrics_collector.clone(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            discovery,
            supervisor,
            metrics_collector,
            shutdown_tx,
            background_tasks: Vec::new(),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the discovery poller and the stats task
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        if *self.is_running.read().await {
            return Err(ServiceError::BackgroundTask {
                message: "Service is already running".to_string(),
            });
        }

        info!("Starting {} service", self.config.service.name);
        *self.is_running.write().await = true;
        self.started_at = Instant::now();
        self.shutdown_tx.send_replace(false);

        self.start_poller();
        self.start_stats_task();

        info!(
            "✅ Watching category {} for races",
            self.config.server.category
        );
        Ok(())
    }

    /// Stop polling and close every room gracefully
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;
        self.shutdown_tx.send_replace(true);

        self.stop_background_tasks().await;

        self.supervisor
            .shutdown()
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to shut down rooms: {}", e),
            })?;

        info!("Final service statistics: {:?}", self.supervisor.stats());
        info!("✅ {} shutdown completed", self.config.service.name);

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn discovery(&self) -> Arc<dyn RaceDiscovery> {
        self.discovery.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    fn start_poller(&mut self) {
        let poller = DiscoveryPoller::new(
            self.discovery.clone(),
            self.supervisor.clone(),
            self.config.server.category.clone(),
            self.config.poll_interval(),
            self.config.discovery.grace_polls,
            self.metrics_collector.clone(),
        );
        let shutdown = self.shutdown_tx.subscribe();

        self.background_tasks.push(tokio::spawn(async move {
            poller.run(shutdown).await;
        }));
    }

    fn start_stats_task(&mut self) {
        info!(
            "Starting stats task ({}s interval)...",
            self.config.stats_interval().as_secs()
        );

        let supervisor = self.supervisor.clone();
        let metrics_collector = self.metrics_collector.clone();
        let stats_interval = self.config.stats_interval();
        let started_at = self.started_at;
        let mut shutdown = self.shutdown_tx.subscribe();

        self.background_tasks.push(tokio::spawn(async move {
            let mut ticker = interval(stats_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        metrics_collector.update_uptime(started_at.elapsed());
                        let stats = supervisor.stats();
                        info!(
                            "Rooms: {} active, {} spawned, {} finished, {} failed, {} torn down",
                            stats.active_rooms,
                            stats.rooms_spawned,
                            stats.rooms_finished,
                            stats.rooms_failed,
                            stats.rooms_torn_down
                        );
                        match metrics_collector.render() {
                            Ok(text) => debug!("Metrics snapshot:\n{}", text),
                            Err(e) => warn!("Failed to render metrics: {}", e),
                        }
                    }
                }
            }

            debug!("Stats task stopped");
        }));
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            debug!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        let grace = self.config.shutdown_timeout();
        for task in self.background_tasks.drain(..) {
            let abort = task.abort_handle();
            if timeout(grace, task).await.is_err() {
                warn!("Background task did not stop within {:?}, aborting", grace);
                abort.abort();
            }
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}

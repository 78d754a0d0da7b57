//! Discovery poller
//!
//! Polls the discovery collaborator on a fixed interval and reconciles the
//! supervisor against the result. A slug must be missing from more than
//! `grace_polls` consecutive successful polls before its room is torn down,
//! which absorbs listing flaps. Failed polls change nothing.

use super::provider::RaceDiscovery;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::supervisor::{SpawnOutcome, Supervisor};
use crate::types::{RaceSlug, RaceSummary};
use crate::utils::shutdown_requested;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Change between two consecutive observations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryDiff {
    /// Slugs seen for the first time, sorted
    pub added: Vec<RaceSlug>,
    /// Slugs absent for more than the grace period, sorted
    pub expired: Vec<RaceSlug>,
}

/// Pure bookkeeping of which slugs are present and how long others have been
/// missing
#[derive(Debug, Clone)]
pub struct DiscoveryTracker {
    grace_polls: u32,
    /// Consecutive polls each tracked slug has been missing from
    misses: HashMap<RaceSlug, u32>,
}

impl DiscoveryTracker {
    pub fn new(grace_polls: u32) -> Self {
        Self {
            grace_polls,
            misses: HashMap::new(),
        }
    }

    /// Record one successful poll
    pub fn observe(&mut self, active: &HashSet<RaceSlug>) -> DiscoveryDiff {
        let mut diff = DiscoveryDiff::default();

        for slug in active {
            if self.misses.insert(slug.clone(), 0).is_none() {
                diff.added.push(slug.clone());
            }
        }

        let grace_polls = self.grace_polls;
        self.misses.retain(|slug, misses| {
            if active.contains(slug) {
                return true;
            }
            *misses += 1;
            if *misses > grace_polls {
                diff.expired.push(slug.clone());
                return false;
            }
            true
        });

        diff.added.sort();
        diff.expired.sort();
        diff
    }

    pub fn is_tracked(&self, slug: &str) -> bool {
        self.misses.contains_key(slug)
    }

    /// Polls `slug` has been missing from, `None` if untracked
    pub fn misses(&self, slug: &str) -> Option<u32> {
        self.misses.get(slug).copied()
    }
}

/// What one poll did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    /// Races listed with a non-terminal status
    pub active: usize,
    pub spawned: Vec<RaceSlug>,
    pub torn_down: Vec<RaceSlug>,
}

/// Reconciles supervised rooms with discovery on an interval
pub struct DiscoveryPoller {
    discovery: Arc<dyn RaceDiscovery>,
    supervisor: Supervisor,
    category: String,
    poll_interval: Duration,
    tracker: DiscoveryTracker,
    metrics_collector: Arc<MetricsCollector>,
}

impl DiscoveryPoller {
    pub fn new(
        discovery: Arc<dyn RaceDiscovery>,
        supervisor: Supervisor,
        category: impl Into<String>,
        poll_interval: Duration,
        grace_polls: u32,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            discovery,
            supervisor,
            category: category.into(),
            poll_interval,
            tracker: DiscoveryTracker::new(grace_polls),
            metrics_collector,
        }
    }

    pub fn tracker(&self) -> &DiscoveryTracker {
        &self.tracker
    }

    /// Poll once and reconcile
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let timer = self.metrics_collector.start_timer();
        let listed = match self.discovery.list_active(&self.category).await {
            Ok(listed) => {
                self.metrics_collector
                    .record_discovery_poll(true, listed.len(), timer.stop());
                listed
            }
            Err(e) => {
                self.metrics_collector
                    .record_discovery_poll(false, 0, timer.stop());
                return Err(e);
            }
        };

        // Finished and cancelled races are never handled
        let races: HashMap<RaceSlug, RaceSummary> = listed
            .into_iter()
            .filter(|race| !race.status.is_terminal())
            .map(|race| (race.slug.clone(), race))
            .collect();
        let active: HashSet<RaceSlug> = races.keys().cloned().collect();

        let diff = self.tracker.observe(&active);
        if !diff.added.is_empty() {
            info!("Discovered {} new races: {:?}", diff.added.len(), diff.added);
        }

        let mut report = PollReport {
            active: active.len(),
            ..PollReport::default()
        };

        let supervised: HashSet<RaceSlug> = self.supervisor.rooms().await.into_iter().collect();
        let mut pending: Vec<&RaceSummary> = races
            .values()
            .filter(|race| !supervised.contains(&race.slug))
            .collect();
        pending.sort_by(|a, b| a.slug.cmp(&b.slug));

        for race in pending {
            if let Some(reason) = self.supervisor.retired_reason(&race.slug).await {
                debug!("[{}] Still listed but retired ({})", race.slug, reason);
                continue;
            }

            let url = match self.discovery.room_url(race).await {
                Ok(url) => url,
                Err(e) => {
                    warn!("[{}] Could not resolve room URL: {:#}", race.slug, e);
                    continue;
                }
            };

            match self.supervisor.spawn(&race.slug, &url).await {
                Ok(SpawnOutcome::Spawned) => report.spawned.push(race.slug.clone()),
                Ok(outcome) => debug!("[{}] Spawn skipped: {:?}", race.slug, outcome),
                Err(e) => warn!("[{}] Spawn failed: {:#}", race.slug, e),
            }
        }

        if !diff.expired.is_empty() {
            info!(
                "Tearing down {} races no longer listed: {:?}",
                diff.expired.len(),
                diff.expired
            );
            let supervisor = &self.supervisor;
            let teardowns = diff.expired.iter().map(|slug| async move {
                match supervisor.teardown(slug).await {
                    Ok(true) => Some(slug.clone()),
                    Ok(false) => None,
                    Err(e) => {
                        warn!("[{}] Teardown failed: {:#}", slug, e);
                        None
                    }
                }
            });
            report.torn_down = join_all(teardowns).await.into_iter().flatten().collect();
        }

        self.supervisor.prune_retired(&active).await;

        Ok(report)
    }

    /// Poll on the configured interval until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Discovery poller started for category {} every {:?}",
            self.category, self.poll_interval
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(report) => debug!(
                            "Poll: {} active, {} spawned, {} torn down",
                            report.active,
                            report.spawned.len(),
                            report.torn_down.len()
                        ),
                        Err(e) => warn!("Discovery poll failed, retrying next tick: {:#}", e),
                    }
                }
            }
        }

        info!("Discovery poller stopped");
    }
}

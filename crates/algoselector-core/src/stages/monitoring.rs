//! Monitoring stage: background polling of system stats and logs.
//!
//! Stats and logs are polled by two independent loops on their own intervals.
//! A failing endpoint records its own error and keeps its last good data, so
//! one outage never blanks out the other view. Every successful stats poll
//! appends a sample to a bounded history for time-series display.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{PipelineContext, StageController};
use crate::cache::CacheKey;
use crate::error::{PipelineError, Result};
use crate::guard::Stage;
use crate::request::StaleGuard;
use crate::status::StageStatus;
use crate::types::{LogEntry, SystemStats};

/// Fixed-capacity buffer that evicts its oldest item when full.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundedHistory<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedHistory<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an item, returning the evicted one if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// One point of the resource usage time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSample {
    pub at: DateTime<Utc>,
    pub cpu_usage: f64,
    pub ram_usage: f64,
}

impl StatsSample {
    fn now(stats: &SystemStats) -> Self {
        Self {
            at: Utc::now(),
            cpu_usage: stats.cpu_usage,
            ram_usage: stats.ram_usage,
        }
    }
}

/// Everything the monitoring view renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringSnapshot {
    pub stats: Option<SystemStats>,
    pub stats_error: Option<PipelineError>,
    pub logs: Vec<LogEntry>,
    pub logs_error: Option<PipelineError>,
    pub history: BoundedHistory<StatsSample>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MonitoringSnapshot {
    fn new(history_capacity: usize) -> Self {
        Self {
            stats: None,
            stats_error: None,
            logs: Vec::new(),
            logs_error: None,
            history: BoundedHistory::new(history_capacity),
            updated_at: None,
        }
    }

    /// Either endpoint has answered at least once.
    pub fn has_data(&self) -> bool {
        self.stats.is_some() || self.updated_at.is_some()
    }
}

/// Owned polling state, cloned into each background loop.
///
/// Stopping advances the guard's epoch, so a poll that was already waiting on
/// the network when the stage was left or the user signed out is discarded.
#[derive(Clone)]
struct Poller {
    ctx: PipelineContext,
    snapshot: Arc<RwLock<MonitoringSnapshot>>,
    guard: StaleGuard,
}

impl Poller {
    fn is_stale(&self, epoch: u64, feed: Feed) -> bool {
        let stale = self.guard.epoch() != epoch;
        if stale {
            debug!(feed = feed.as_str(), "Dropping stale poll");
        }
        stale
    }

    async fn poll_stats(&self) -> Result<SystemStats> {
        let epoch = self.guard.epoch();
        let gateway = &self.ctx.gateway;
        let result = self
            .ctx
            .cache
            .refresh(CacheKey::system_stats(), || gateway.system_stats())
            .await;
        if self.is_stale(epoch, Feed::Stats) {
            return result;
        }

        let mut snapshot = self.snapshot.write();
        match &result {
            Ok(stats) => {
                snapshot.stats = Some(stats.clone());
                snapshot.stats_error = None;
                snapshot.history.push(StatsSample::now(stats));
                snapshot.updated_at = Some(Utc::now());
            }
            Err(err) => {
                warn!("System stats poll failed: {}", err);
                snapshot.stats_error = Some(err.clone());
            }
        }
        result
    }

    async fn poll_logs(&self) -> Result<Vec<LogEntry>> {
        let epoch = self.guard.epoch();
        let gateway = &self.ctx.gateway;
        let result = self
            .ctx
            .cache
            .refresh(CacheKey::system_logs(), || gateway.system_logs())
            .await;
        if self.is_stale(epoch, Feed::Logs) {
            return result;
        }

        let mut snapshot = self.snapshot.write();
        match &result {
            Ok(logs) => {
                snapshot.logs = logs.clone();
                snapshot.logs_error = None;
                snapshot.updated_at = Some(Utc::now());
            }
            Err(err) => {
                warn!("System logs poll failed: {}", err);
                snapshot.logs_error = Some(err.clone());
            }
        }
        result
    }
}

/// Which endpoint a background loop polls.
#[derive(Debug, Clone, Copy)]
enum Feed {
    Stats,
    Logs,
}

impl Feed {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Logs => "logs",
        }
    }
}

pub struct MonitoringController {
    poller: Poller,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitoringController {
    pub fn new(ctx: PipelineContext) -> Self {
        let snapshot = MonitoringSnapshot::new(ctx.config.history_capacity);
        Self {
            poller: Poller {
                ctx,
                snapshot: Arc::new(RwLock::new(snapshot)),
                guard: StaleGuard::new(),
            },
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> MonitoringSnapshot {
        self.poller.snapshot.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().iter().any(|task| !task.is_finished())
    }

    /// Poll system stats once, outside the background loop.
    pub async fn poll_stats_once(&self) -> Result<SystemStats> {
        self.poller.poll_stats().await
    }

    /// Poll system logs once, outside the background loop.
    pub async fn poll_logs_once(&self) -> Result<Vec<LogEntry>> {
        self.poller.poll_logs().await
    }

    /// Spawn the two polling loops. Does nothing if they are already running.
    ///
    /// The first tick of each loop comes one interval after the call. Loops
    /// exit on their own once the session loses its credential.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.iter().any(|task| !task.is_finished()) {
            return;
        }
        tasks.clear();

        let config = &self.poller.ctx.config;
        tasks.push(spawn_loop(self.poller.clone(), Feed::Stats, config.stats_interval));
        tasks.push(spawn_loop(self.poller.clone(), Feed::Logs, config.logs_interval));
        info!(
            stats_interval_ms = config.stats_interval.as_millis() as u64,
            logs_interval_ms = config.logs_interval.as_millis() as u64,
            "Monitoring started"
        );
    }

    /// Abort both polling loops and discard any poll still in flight.
    pub fn stop(&self) {
        self.poller.guard.cancel();
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Monitoring stopped");
    }
}

fn spawn_loop(poller: Poller, feed: Feed, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = match feed {
                Feed::Stats => poller.poll_stats().await.map(|_| ()),
                Feed::Logs => poller.poll_logs().await.map(|_| ()),
            };
            if let Err(PipelineError::Unauthenticated) = outcome {
                debug!(feed = feed.as_str(), "Signed out, polling loop exiting");
                break;
            }
        }
    })
}

impl Drop for MonitoringController {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl StageController for MonitoringController {
    type Output = MonitoringSnapshot;

    fn stage(&self) -> Stage {
        Stage::Monitoring
    }

    /// Ready as soon as either endpoint has answered. An error only when
    /// both have failed and nothing was ever shown.
    fn status(&self) -> StageStatus<MonitoringSnapshot> {
        if let Err(err) = self.poller.ctx.require(Stage::Monitoring) {
            return StageStatus::from_error(&err);
        }
        let snapshot = self.snapshot();
        if snapshot.has_data() {
            return StageStatus::Ready(snapshot);
        }
        match (&snapshot.stats_error, &snapshot.logs_error) {
            (Some(err), Some(_)) => StageStatus::from_error(err),
            _ if self.is_running() => StageStatus::Loading,
            _ => StageStatus::Idle,
        }
    }

    async fn enter(&self) -> StageStatus<MonitoringSnapshot> {
        if let Err(err) = self.poller.ctx.require(Stage::Monitoring) {
            return StageStatus::from_error(&err);
        }
        let epoch = self.poller.guard.epoch();
        let _ = tokio::join!(self.poller.poll_stats(), self.poller.poll_logs());
        // Left or signed out while the first polls were pending.
        if self.poller.guard.epoch() == epoch {
            self.start();
        }
        self.status()
    }

    async fn refresh(&self) -> StageStatus<MonitoringSnapshot> {
        let _ = tokio::join!(self.poller.poll_stats(), self.poller.poll_logs());
        self.status()
    }

    fn leave(&self) {
        self.stop();
    }

    fn reset(&self) {
        self.stop();
        let capacity = self.poller.ctx.config.history_capacity;
        *self.poller.snapshot.write() = MonitoringSnapshot::new(capacity);
    }
}

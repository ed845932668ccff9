//! Scheduler Core
//!
//! Owns all shared alert state and runs the evaluation, notification and
//! persistence loops.

use crate::config::{RuleSet, ScheduleConfig};
use crate::executor::Executor;
use crate::SchedError;
use alert_model::{AlertKey, Silence, State};
use alerting::{dispatch, LogTransport, NotificationManager, PendingMap, PlainRenderer, Renderer, Transport};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use storage::{decode, encode, StateStore};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub(crate) const STATUS_BLOB: &str = "status";
pub(crate) const NOTIFICATIONS_BLOB: &str = "notifications";
pub(crate) const SILENCE_BLOB: &str = "silence";

/// State guarded by the scheduler lock
pub(crate) struct Inner {
    pub states: HashMap<AlertKey, State>,
    pub notifications: NotificationManager,
    pub silences: HashMap<String, Silence>,
    /// Alerts whose last evaluation failed to execute
    pub failing: HashSet<String>,
    pub cycles: u64,
    pub last_check: Option<DateTime<Utc>>,
}

/// Alert scheduler
pub struct Schedule {
    pub(crate) rules: RuleSet,
    pub(crate) config: ScheduleConfig,
    pub(crate) inner: Mutex<Inner>,
    pub(crate) check_running: Semaphore,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) transport: Arc<dyn Transport>,
    store: Arc<dyn StateStore>,
    pub(crate) notify_wake: Notify,
    save_wake: Notify,
    pub(crate) started: DateTime<Utc>,
}

impl Schedule {
    /// Create a scheduler with the plain renderer and log transport
    pub fn new(
        rules: RuleSet,
        config: ScheduleConfig,
        executor: Arc<dyn Executor>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let notifications = NotificationManager::new(config.max_notify_wait);
        Self {
            rules,
            inner: Mutex::new(Inner {
                states: HashMap::new(),
                notifications,
                silences: HashMap::new(),
                failing: HashSet::new(),
                cycles: 0,
                last_check: None,
            }),
            config,
            check_running: Semaphore::new(1),
            executor,
            renderer: Arc::new(PlainRenderer),
            transport: Arc::new(LogTransport),
            store,
            notify_wake: Notify::new(),
            save_wake: Notify::new(),
            started: Utc::now(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Override the startup time used for the Unknown grace period
    pub fn with_start_time(mut self, started: DateTime<Utc>) -> Self {
        self.started = started;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started
    }

    /// Completed and in-flight cycles since startup
    pub fn cycles(&self) -> u64 {
        self.lock().cycles
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.lock().last_check
    }

    /// Notifications currently waiting on a timeout
    pub fn pending_notifications(&self) -> PendingMap {
        self.lock().notifications.pending().clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the persistence loop for a debounced snapshot write
    pub(crate) fn request_save(&self) {
        self.save_wake.notify_one();
    }

    /// Write all three snapshot blobs now
    pub async fn save(&self) -> Result<(), SchedError> {
        let (status, notifications, silence) = {
            let inner = self.lock();
            (
                encode(&inner.states)?,
                encode(inner.notifications.pending())?,
                encode(&inner.silences)?,
            )
        };
        self.store.save(STATUS_BLOB, &status).await?;
        self.store.save(NOTIFICATIONS_BLOB, &notifications).await?;
        self.store.save(SILENCE_BLOB, &silence).await?;
        debug!(
            "Saved snapshot ({} + {} + {} bytes)",
            status.len(),
            notifications.len(),
            silence.len()
        );
        Ok(())
    }

    /// Load snapshot blobs saved by a previous run.
    ///
    /// Blobs that fail to decode are logged and skipped. States of alerts no
    /// longer configured are dropped.
    pub async fn restore(&self) -> Result<(), SchedError> {
        let status = self.store.load(STATUS_BLOB).await?;
        let notifications = self.store.load(NOTIFICATIONS_BLOB).await?;
        let silence = self.store.load(SILENCE_BLOB).await?;

        let mut inner = self.lock();
        if let Some(data) = status {
            match decode::<HashMap<AlertKey, State>>(&data) {
                Ok(mut states) => {
                    states.retain(|ak, _| self.rules.alert(ak.name()).is_some());
                    inner.states = states;
                }
                Err(e) => warn!("Discarding unreadable {} snapshot: {}", STATUS_BLOB, e),
            }
        }
        if let Some(data) = notifications {
            match decode::<PendingMap>(&data) {
                Ok(pending) => {
                    inner.notifications =
                        NotificationManager::restore(pending, self.config.max_notify_wait)
                }
                Err(e) => warn!("Discarding unreadable {} snapshot: {}", NOTIFICATIONS_BLOB, e),
            }
        }
        if let Some(data) = silence {
            match decode::<HashMap<String, Silence>>(&data) {
                Ok(silences) => inner.silences = silences,
                Err(e) => warn!("Discarding unreadable {} snapshot: {}", SILENCE_BLOB, e),
            }
        }
        info!(
            "Restored {} states and {} silences",
            inner.states.len(),
            inner.silences.len()
        );
        Ok(())
    }

    /// Spawn the evaluation, notification and persistence loops
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            "Starting scheduler: {} alerts every {:?}",
            self.rules.alerts().len(),
            self.config.check_frequency
        );
        vec![
            tokio::spawn(Arc::clone(self).run_checks()),
            tokio::spawn(Arc::clone(self).run_notifications()),
            tokio::spawn(Arc::clone(self).run_saves()),
        ]
    }

    async fn run_checks(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.check_frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.check(Utc::now()).await {
                Ok(report) => debug!(
                    "Cycle {} evaluated {} keys in {:?}",
                    report.cycle, report.events, report.duration
                ),
                Err(SchedError::CheckRunning) => warn!("Skipping cycle: previous check still running"),
                Err(e) => error!("Check failed: {}", e),
            }
        }
    }

    async fn run_notifications(self: Arc<Self>) {
        loop {
            let plan = self.check_notifications(Utc::now());
            if !plan.deliveries.is_empty() {
                dispatch(Arc::clone(&self.transport), plan.deliveries).detach_all();
            }
            tokio::select! {
                _ = tokio::time::sleep(plan.next_wake) => {}
                _ = self.notify_wake.notified() => {}
            }
        }
    }

    async fn run_saves(self: Arc<Self>) {
        loop {
            self.save_wake.notified().await;
            tokio::time::sleep(self.config.save_debounce).await;
            if let Err(e) = self.save().await {
                error!("Failed to save snapshot: {}", e);
            }
        }
    }
}

//! Notification Manager Implementation

use alert_model::AlertKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timed notifications per key: notification name -> time queued
pub type PendingMap = HashMap<AlertKey, HashMap<String, DateTime<Utc>>>;

/// A notification ready to be planned for dispatch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Outgoing {
    pub key: AlertKey,
    pub notification: String,
}

/// Result of one queue poll
#[derive(Debug, Default)]
pub struct PollResult {
    /// Notifications to dispatch now
    pub ready: Vec<Outgoing>,
    /// Due entries held back because their key is unevaluated
    pub deferred: usize,
    /// Time until the earliest waiting entry falls due
    pub next_wake: Duration,
}

/// Convert a std duration, saturating at a century
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(5200))
}

/// Queue of outgoing and timed notifications
pub struct NotificationManager {
    /// Timed entries waiting for their definition's timeout
    pending: PendingMap,
    /// Entries queued by transitions, sent on the next poll
    outbox: Vec<Outgoing>,
    /// Upper bound on the poll wake-up interval
    max_wait: Duration,
}

impl NotificationManager {
    /// Create an empty manager
    pub fn new(max_wait: Duration) -> Self {
        debug!("Creating notification manager (max wait {:?})", max_wait);
        Self {
            pending: HashMap::new(),
            outbox: Vec::new(),
            max_wait,
        }
    }

    /// Rebuild from a persisted pending map
    pub fn restore(pending: PendingMap, max_wait: Duration) -> Self {
        info!("Restored {} keys with pending notifications", pending.len());
        Self {
            pending,
            outbox: Vec::new(),
            max_wait,
        }
    }

    /// Queue a notification for the next poll. Returns false if already queued.
    pub fn queue(&mut self, key: &AlertKey, notification: &str) -> bool {
        let outgoing = Outgoing {
            key: key.clone(),
            notification: notification.to_string(),
        };
        if self.outbox.contains(&outgoing) {
            return false;
        }
        debug!("Queued {} for {}", notification, key);
        self.outbox.push(outgoing);
        true
    }

    /// Add a timed entry that fires after the definition's timeout
    pub fn add_pending(&mut self, key: &AlertKey, notification: &str, at: DateTime<Utc>) {
        self.pending
            .entry(key.clone())
            .or_default()
            .insert(notification.to_string(), at);
    }

    /// Drop every queued and timed entry for a key
    pub fn clear(&mut self, key: &AlertKey) {
        self.pending.remove(key);
        self.outbox.retain(|o| &o.key != key);
    }

    pub fn has_pending(&self, key: &AlertKey) -> bool {
        self.pending.get(key).map_or(false, |m| !m.is_empty())
    }

    pub fn pending_for(&self, key: &AlertKey) -> Option<&HashMap<String, DateTime<Utc>>> {
        self.pending.get(key)
    }

    pub fn pending(&self) -> &PendingMap {
        &self.pending
    }

    pub fn outbox(&self) -> &[Outgoing] {
        &self.outbox
    }

    /// Poll the queue at `now`.
    ///
    /// `timeout_of` resolves a definition's timeout (None drops the entry);
    /// `unevaluated` reports a key's withheld flag (None when the key no
    /// longer exists, which drops the entry).
    pub fn poll<T, U>(&mut self, now: DateTime<Utc>, timeout_of: T, unevaluated: U) -> PollResult
    where
        T: Fn(&str) -> Option<Duration>,
        U: Fn(&AlertKey) -> Option<bool>,
    {
        let mut result = PollResult {
            ready: std::mem::take(&mut self.outbox),
            deferred: 0,
            next_wake: self.max_wait,
        };

        let pending = std::mem::take(&mut self.pending);
        for (key, entries) in pending {
            for (name, queued_at) in entries {
                let Some(timeout) = timeout_of(&name) else {
                    warn!("Dropping pending {} for {}: notification not defined", name, key);
                    continue;
                };

                let due = queued_at + to_chrono(timeout);
                if due > now {
                    let remaining = (due - now).to_std().unwrap_or_default();
                    result.next_wake = result.next_wake.min(remaining);
                    self.add_pending(&key, &name, queued_at);
                    continue;
                }

                match unevaluated(&key) {
                    None => debug!("Dropping pending {} for vanished key {}", name, key),
                    Some(true) => {
                        // Requeue unchanged until the dependency clears
                        result.deferred += 1;
                        self.add_pending(&key, &name, queued_at);
                    }
                    Some(false) => result.ready.push(Outgoing {
                        key: key.clone(),
                        notification: name,
                    }),
                }
            }
        }

        if !result.ready.is_empty() {
            debug!(
                "Notification poll: {} ready, {} deferred",
                result.ready.len(),
                result.deferred
            );
        }
        result
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

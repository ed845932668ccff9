//! Notification Dispatch Planning

use crate::schedule::Schedule;
use alert_model::{AlertKey, Status};
use alerting::{batch_unknowns, Delivery, Message, UnknownBatch};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Deliveries due now and when to look again
#[derive(Debug)]
pub struct NotificationPlan {
    pub deliveries: Vec<Delivery>,
    /// Sleep before the next poll, absent other wake-ups
    pub next_wake: Duration,
    /// Due entries held back by an unevaluated key
    pub deferred: usize,
}

impl Schedule {
    /// Drain the outbox and due timed entries into deliveries.
    ///
    /// Silenced keys are skipped. Unknown keys are batched per notification
    /// to bound the number of messages. Every sent definition with a
    /// successor queues that successor as a fresh timed entry.
    pub fn check_notifications(&self, now: DateTime<Utc>) -> NotificationPlan {
        let mut deliveries = Vec::new();
        let mut unknowns: BTreeMap<String, Vec<AlertKey>> = BTreeMap::new();
        let mut changed = false;

        let (next_wake, deferred) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let rules = &self.rules;
            let states = &inner.states;
            let poll = inner.notifications.poll(
                now,
                |name| rules.notification(name).map(|n| n.timeout()),
                |ak| states.get(ak).map(|s| s.unevaluated),
            );
            let mut next_wake = poll.next_wake;
            changed |= !poll.ready.is_empty();

            for out in poll.ready {
                let Some(def) = self.rules.notification(&out.notification) else {
                    continue;
                };
                let Some(state) = inner.states.get(&out.key) else {
                    debug!("Skipping {} for vanished key {}", def.name, out.key);
                    continue;
                };
                let unknown = state.status() == Status::Unknown;
                let silenced = inner.silence_for(now, &out.key).is_some();

                if silenced && unknown {
                    info!("Silencing unknown {}", out.key);
                    continue;
                }
                if silenced {
                    info!("Silencing {}", out.key);
                } else if unknown {
                    unknowns
                        .entry(def.name.clone())
                        .or_default()
                        .push(out.key.clone());
                } else if !self.config.quiet {
                    deliveries.push(Delivery {
                        notification: def.clone(),
                        message: Message::from_state(state, def),
                    });
                }

                if let Some(next) = &def.next {
                    inner.notifications.add_pending(&out.key, next, now);
                    if let Some(successor) = self.rules.notification(next) {
                        next_wake = next_wake.min(successor.timeout());
                    }
                }
            }
            (next_wake, poll.deferred)
        };

        for (name, keys) in unknowns {
            let Some(def) = self.rules.notification(&name) else {
                continue;
            };
            let batches = batch_unknowns(
                &keys,
                self.config.unknown_threshold,
                self.config.min_group_size,
            );
            info!("{}: {} unknown keys in {} messages", name, keys.len(), batches.len());
            if self.config.quiet {
                continue;
            }
            for batch in batches {
                let message = match batch {
                    UnknownBatch::Group { name, keys } => Message::unknown_group(&name, &keys),
                    UnknownBatch::Digest { groups } => Message::unknown_digest(&groups),
                };
                deliveries.push(Delivery {
                    notification: def.clone(),
                    message,
                });
            }
        }

        if deferred > 0 {
            metrics::counter!("sched.notifications.deferred").increment(deferred as u64);
        }
        if changed {
            self.request_save();
        }
        NotificationPlan {
            deliveries,
            next_wake,
            deferred,
        }
    }
}

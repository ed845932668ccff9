//! State Transitions
//!
//! Applies one cycle's events to the per-key states and decides what to
//! notify. Runs entirely under the scheduler lock.

use crate::history::RunHistory;
use crate::schedule::{Inner, Schedule};
use alert_model::{ActionType, AlertKey, AlertRule, State, Status};
use alerting::{apply_templates, NotificationManager};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Follow-up work produced by a transition pass
#[derive(Debug, Default)]
pub(crate) struct TransitionOutcome {
    /// Notifications put in the outbox
    pub queued: usize,
    /// Keys that reached Normal while silenced
    pub auto_close: Vec<AlertKey>,
}

impl Schedule {
    pub(crate) fn apply_run_history(&self, inner: &mut Inner, rh: RunHistory) -> TransitionOutcome {
        let start = rh.start;
        let mut events: Vec<_> = rh.events.into_iter().collect();
        events.sort_by(|a, b| a.0.cmp(&b.0));

        let mut outcome = TransitionOutcome::default();
        for (ak, mut event) in events {
            let Some(rule) = self.rules.alert(ak.name()) else {
                debug!("Dropping event for unconfigured alert {}", ak);
                continue;
            };
            event.time = start;
            let (silenced, forget) = inner
                .silence_for(start, &ak)
                .map_or((false, false), |s| (true, s.forget));

            let state = inner
                .states
                .entry(ak.clone())
                .or_insert_with(|| State::new(ak.clone(), start));
            state.unevaluated = event.unevaluated;
            if event.unevaluated {
                state.touched = start;
                continue;
            }

            let last = if state.open {
                state.abnormal_status()
            } else {
                Status::Normal
            };
            // Seeded Unknown events carry no data
            if event.status != Status::Unknown || event.crit.is_some() || event.warn.is_some() {
                state.touched = start;
            }
            let status = event.status;
            state.append(event.clone());

            if status.is_abnormal() {
                apply_templates(self.renderer.as_ref(), rule, state, &event);
                if !rule.log {
                    state.open = true;
                }
                if status != Status::Unknown {
                    state.forgotten = false;
                }
            }

            if status > last {
                info!("{} escalated {} -> {}", ak, last, status);
                inner.notifications.clear(&ak);
                state.need_ack = false;
                outcome.queued +=
                    notify_current(rule, state, status, forget, &mut inner.notifications, start);
            } else if status < last {
                info!("{} de-escalated {} -> {}", ak, last, status);
                if inner.notifications.has_pending(&ak) {
                    outcome.queued += notify_current(
                        rule,
                        state,
                        status,
                        forget,
                        &mut inner.notifications,
                        start,
                    );
                }
                if status == Status::Normal && silenced {
                    outcome.auto_close.push(ak.clone());
                }
            }
        }
        outcome
    }
}

/// Notify for the key's current status, returning how many were queued.
///
/// Unknown keys of rules ignoring unknowns, or under a forget silence, are
/// closed and forgotten instead.
fn notify_current(
    rule: &AlertRule,
    state: &mut State,
    status: Status,
    forget_silenced: bool,
    manager: &mut NotificationManager,
    now: DateTime<Utc>,
) -> usize {
    if status == Status::Unknown && (rule.ignore_unknown || forget_silenced) {
        let reason = if rule.ignore_unknown {
            "Auto close: rule ignores unknown"
        } else {
            "Auto close: silenced with forget"
        };
        state.open = false;
        state.forgotten = true;
        state.need_ack = false;
        state.record_action("scheduler", reason, ActionType::Close, now);
        info!("{}: {}", state.key, reason);
        return 0;
    }
    if rule.log {
        return 0;
    }

    state.need_ack = true;
    let mut queued = 0;
    for name in rule.notifications_for(status) {
        if manager.queue(&state.key, name) {
            queued += 1;
        }
    }
    queued
}

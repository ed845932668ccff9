//! Operator Actions

use crate::schedule::Schedule;
use alert_model::{ActionType, AlertKey, Status};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

/// Rejected actions; nothing is mutated when one is returned
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("No such alert key: {0}")]
    NoSuchKey(AlertKey),
    #[error("Alert already acknowledged: {0}")]
    AlreadyAcknowledged(AlertKey),
    #[error("Cannot acknowledge closed alert: {0}")]
    CannotAcknowledgeClosed(AlertKey),
    #[error("Cannot close active alert: {0}")]
    CannotCloseActive(AlertKey),
    #[error("Can only forget unknowns: {0}")]
    NotUnknown(AlertKey),
}

impl Schedule {
    /// Apply an operator action to one key
    pub fn action(
        &self,
        user: &str,
        message: &str,
        kind: ActionType,
        ak: &AlertKey,
        now: DateTime<Utc>,
    ) -> Result<(), ActionError> {
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let state = inner
                .states
                .get_mut(ak)
                .ok_or_else(|| ActionError::NoSuchKey(ak.clone()))?;

            match kind {
                ActionType::Acknowledge => {
                    if !state.need_ack {
                        return Err(ActionError::AlreadyAcknowledged(ak.clone()));
                    }
                    if !state.open {
                        return Err(ActionError::CannotAcknowledgeClosed(ak.clone()));
                    }
                    state.need_ack = false;
                    inner.notifications.clear(ak);
                }
                ActionType::Close => {
                    if state.is_active() && state.abnormal_status() != Status::Error {
                        return Err(ActionError::CannotCloseActive(ak.clone()));
                    }
                    state.need_ack = false;
                    state.open = false;
                    inner.notifications.clear(ak);
                }
                ActionType::ForceClose => {
                    state.need_ack = false;
                    state.open = false;
                    inner.notifications.clear(ak);
                }
                ActionType::Forget => {
                    if state.abnormal_status() != Status::Unknown {
                        return Err(ActionError::NotUnknown(ak.clone()));
                    }
                    inner.notifications.clear(ak);
                    inner.states.remove(ak);
                }
            }
            if let Some(state) = inner.states.get_mut(ak) {
                state.record_action(user, message, kind, now);
            }
        }
        info!("{} by {} on {}: {}", kind, user, ak, message);
        self.request_save();
        Ok(())
    }
}

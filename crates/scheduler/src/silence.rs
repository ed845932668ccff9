//! Silence Registry

use crate::schedule::{Inner, Schedule};
use alert_model::{AlertKey, ModelError, Silence, TagSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

/// Silence request errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SilenceError {
    #[error("Both start and end must be specified")]
    MissingTimes,
    #[error("Start time must be before end time")]
    StartAfterEnd,
    #[error("End time must be in the future")]
    EndInPast,
    #[error("Must specify either alert or tags")]
    EmptyFilter,
    #[error(transparent)]
    InvalidTags(#[from] ModelError),
    #[error("No silence with id {0}")]
    NotFound(String),
}

/// Request to preview or create a silence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceRequest {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Alert name; empty matches every alert
    pub alert: String,
    /// Tag patterns as `k=glob,k2=glob`
    pub tags: String,
    pub forget: bool,
    /// Commit the silence; otherwise only preview affected keys
    pub confirm: bool,
    /// Id of a silence this one replaces
    pub edit: Option<String>,
    pub user: String,
    pub message: String,
}

impl Inner {
    /// Active silence matching a key, preferring the latest end
    pub(crate) fn silence_for(&self, now: DateTime<Utc>, key: &AlertKey) -> Option<&Silence> {
        self.silences
            .values()
            .filter(|s| s.silences(now, key))
            .max_by_key(|s| s.end)
    }
}

impl Schedule {
    /// Every tracked key under an active silence, with that silence
    pub fn silenced(&self, now: DateTime<Utc>) -> HashMap<AlertKey, Silence> {
        let inner = self.lock();
        inner
            .states
            .keys()
            .filter_map(|ak| inner.silence_for(now, ak).map(|s| (ak.clone(), s.clone())))
            .collect()
    }

    /// Validate and optionally commit a silence.
    ///
    /// Returns every tracked key the silence matches, mapped to whether it
    /// is currently active.
    pub fn add_silence(
        &self,
        req: SilenceRequest,
        now: DateTime<Utc>,
    ) -> Result<HashMap<AlertKey, bool>, SilenceError> {
        let (Some(start), Some(end)) = (req.start, req.end) else {
            return Err(SilenceError::MissingTimes);
        };
        if start >= end {
            return Err(SilenceError::StartAfterEnd);
        }
        if end <= now {
            return Err(SilenceError::EndInPast);
        }
        let alert = req.alert.trim();
        let tags = req.tags.trim();
        if alert.is_empty() && tags.is_empty() {
            return Err(SilenceError::EmptyFilter);
        }

        let silence = Silence {
            start,
            end,
            alert: (!alert.is_empty()).then(|| alert.to_string()),
            tags: tags.parse::<TagSet>()?,
            forget: req.forget,
            user: req.user,
            message: req.message,
        };
        silence.validate_patterns()?;

        let affected = {
            let mut inner = self.lock();
            let affected: HashMap<_, _> = inner
                .states
                .iter()
                .filter(|(ak, _)| silence.matches(ak))
                .map(|(ak, st)| (ak.clone(), st.is_active()))
                .collect();
            if req.confirm {
                if let Some(edit) = &req.edit {
                    inner.silences.remove(edit);
                }
                let id = silence.id();
                info!(
                    "Silence {} by {} until {} ({} keys)",
                    id,
                    silence.user,
                    silence.end,
                    affected.len()
                );
                inner.silences.insert(id, silence);
            }
            affected
        };
        if req.confirm {
            self.request_save();
        }
        Ok(affected)
    }

    pub fn clear_silence(&self, id: &str) -> Result<Silence, SilenceError> {
        let removed = self
            .lock()
            .silences
            .remove(id)
            .ok_or_else(|| SilenceError::NotFound(id.to_string()))?;
        info!("Cleared silence {}", id);
        self.request_save();
        Ok(removed)
    }

    /// All silences by id, including expired and future ones
    pub fn silence_list(&self) -> HashMap<String, Silence> {
        self.lock().silences.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testing::*;
    use alert_model::{AlertRule, Event, State, Status};
    use chrono::Duration;

    fn seeded() -> Schedule {
        let (sched, _, _) = schedule(vec![AlertRule::new("cpu"), AlertRule::new("mem")], vec![]);
        let now = Utc::now();
        {
            let mut inner = sched.lock();
            for (text, status) in [
                ("cpu{host=web01}", Status::Critical),
                ("cpu{host=db01}", Status::Normal),
                ("mem{host=web01}", Status::Warning),
            ] {
                let ak: AlertKey = text.parse().unwrap();
                let mut state = State::new(ak.clone(), now);
                state.append(Event::new(status, now));
                inner.states.insert(ak, state);
            }
        }
        sched
    }

    fn request(alert: &str, tags: &str, confirm: bool) -> SilenceRequest {
        let now = Utc::now();
        SilenceRequest {
            start: Some(now - Duration::minutes(1)),
            end: Some(now + Duration::hours(1)),
            alert: alert.to_string(),
            tags: tags.to_string(),
            confirm,
            user: "ops".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation() {
        let sched = seeded();
        let now = Utc::now();

        let mut req = request("cpu", "", false);
        req.end = None;
        assert_eq!(sched.add_silence(req, now), Err(SilenceError::MissingTimes));

        let mut req = request("cpu", "", false);
        req.end = req.start;
        assert_eq!(sched.add_silence(req, now), Err(SilenceError::StartAfterEnd));

        let mut req = request("cpu", "", false);
        req.start = Some(now - Duration::hours(2));
        req.end = Some(now - Duration::hours(1));
        assert_eq!(sched.add_silence(req, now), Err(SilenceError::EndInPast));

        assert_eq!(
            sched.add_silence(request("", "", false), now),
            Err(SilenceError::EmptyFilter)
        );
        assert!(matches!(
            sched.add_silence(request("", "host", false), now),
            Err(SilenceError::InvalidTags(_))
        ));
        assert!(matches!(
            sched.add_silence(request("", "host=[", false), now),
            Err(SilenceError::InvalidTags(_))
        ));
    }

    #[test]
    fn test_preview_does_not_commit() {
        let sched = seeded();
        let preview = sched
            .add_silence(request("", "host=web*", false), Utc::now())
            .unwrap();
        assert_eq!(preview.len(), 2);
        assert_eq!(preview[&"cpu{host=web01}".parse::<AlertKey>().unwrap()], true);
        assert!(sched.silence_list().is_empty());
    }

    #[test]
    fn test_confirm_edit_and_clear() {
        let sched = seeded();
        let now = Utc::now();
        sched.add_silence(request("cpu", "", true), now).unwrap();
        let ids: Vec<_> = sched.silence_list().into_keys().collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(sched.silenced(now).len(), 2);

        let mut edit = request("cpu", "host=db01", true);
        edit.edit = Some(ids[0].clone());
        sched.add_silence(edit, now).unwrap();
        let list = sched.silence_list();
        assert_eq!(list.len(), 1);
        assert!(!list.contains_key(&ids[0]));
        assert_eq!(sched.silenced(now).len(), 1);

        let id = list.into_keys().next().unwrap();
        sched.clear_silence(&id).unwrap();
        assert_eq!(sched.clear_silence(&id), Err(SilenceError::NotFound(id)));
    }

    #[test]
    fn test_latest_end_wins() {
        let sched = seeded();
        let now = Utc::now();
        let mut short = request("cpu", "", true);
        short.end = Some(now + Duration::minutes(10));
        sched.add_silence(short, now).unwrap();
        let long = request("", "host=web01", true);
        sched.add_silence(long, now).unwrap();

        let silenced = sched.silenced(now);
        let web = &silenced[&"cpu{host=web01}".parse::<AlertKey>().unwrap()];
        assert_eq!(web.tags.get("host"), Some("web01"));
        let db = &silenced[&"cpu{host=db01}".parse::<AlertKey>().unwrap()];
        assert_eq!(db.alert.as_deref(), Some("cpu"));
    }
}

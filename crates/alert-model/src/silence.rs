//! Time-Boxed Silences

use crate::{AlertKey, ModelError, TagSet};
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Suppression rule matched by alert name and tag glob patterns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Silence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Restrict to one alert name
    pub alert: Option<String>,
    /// Tag key -> glob pattern; every pattern must match
    pub tags: TagSet,
    /// Unknown transitions of matching keys are auto-closed and forgotten
    pub forget: bool,
    pub user: String,
    pub message: String,
}

impl Silence {
    /// Stable identifier derived from the window and filters
    pub fn id(&self) -> String {
        let text = format!(
            "{}|{}|{}|{}",
            self.start.timestamp(),
            self.end.timestamp(),
            self.alert.as_deref().unwrap_or(""),
            self.tags
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, text.as_bytes())
            .simple()
            .to_string()
    }

    /// Check every tag pattern compiles
    pub fn validate_patterns(&self) -> Result<(), ModelError> {
        for (tag, pattern) in self.tags.iter() {
            Pattern::new(pattern).map_err(|_| ModelError::InvalidPattern {
                tag: tag.to_string(),
                pattern: pattern.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn active_at(&self, now: DateTime<Utc>) -> bool {
        self.start < now && now < self.end
    }

    /// Name and tag filter match, ignoring the time window
    pub fn matches(&self, key: &AlertKey) -> bool {
        if let Some(alert) = &self.alert {
            if alert != key.name() {
                return false;
            }
        }
        self.tags.iter().all(|(tag, pattern)| {
            match (key.group().get(tag), Pattern::new(pattern)) {
                (Some(value), Ok(p)) => p.matches(value),
                _ => false,
            }
        })
    }

    pub fn silences(&self, now: DateTime<Utc>, key: &AlertKey) -> bool {
        self.active_at(now) && self.matches(key)
    }
}

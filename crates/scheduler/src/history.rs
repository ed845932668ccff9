//! Per-Cycle Run History

use crate::executor::GroupResult;
use alert_model::{AlertKey, Event, Status, TagSet};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Last persisted status of every key, by alert name
pub type PriorStatuses = HashMap<String, Vec<(TagSet, Status)>>;

/// Transient context of one evaluation cycle
pub struct RunHistory {
    /// Cycle start
    pub start: DateTime<Utc>,
    /// Outcome per key
    pub events: HashMap<AlertKey, Event>,
    /// Query results memoized by query text
    cache: HashMap<String, Arc<Vec<GroupResult>>>,
    /// Statuses captured at cycle start
    prior: PriorStatuses,
}

fn indicator(group: &TagSet, status: Status) -> GroupResult {
    GroupResult::new(group.clone(), if status.is_abnormal() { 1.0 } else { 0.0 })
}

impl RunHistory {
    pub fn new(start: DateTime<Utc>, prior: PriorStatuses) -> Self {
        Self {
            start,
            events: HashMap::new(),
            cache: HashMap::new(),
            prior,
        }
    }

    pub(crate) fn cached(&self, query: &str) -> Option<Arc<Vec<GroupResult>>> {
        self.cache.get(query).cloned()
    }

    pub(crate) fn store(&mut self, query: &str, results: Arc<Vec<GroupResult>>) {
        self.cache.insert(query.to_string(), results);
    }

    /// Resolve an alert reference: 1 per abnormal group, 0 otherwise.
    ///
    /// Always answers from the statuses captured at cycle start, so a chain
    /// of dependencies advances one hop per cycle.
    pub fn alert_results(&self, alert: &str) -> Vec<GroupResult> {
        self.prior
            .get(alert)
            .map(|entries| entries.iter().map(|(g, s)| indicator(g, *s)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_results_ignore_current_cycle() {
        let now = Utc::now();
        let group: TagSet = "host=a".parse().unwrap();
        let mut prior = PriorStatuses::new();
        prior.insert("up".to_string(), vec![(group.clone(), Status::Critical)]);

        let mut rh = RunHistory::new(now, prior);
        assert_eq!(rh.alert_results("up")[0].value, 1.0);

        rh.events
            .insert(AlertKey::new("up", group), Event::new(Status::Normal, now));
        assert_eq!(rh.alert_results("up")[0].value, 1.0);
        assert!(rh.alert_results("other").is_empty());
    }
}

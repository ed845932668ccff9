//! Dependency Resolution

use crate::executor::GroupResult;
use alert_model::{AlertKey, Event, Status, TagSet};
use std::collections::HashMap;

/// Groups of a dependency expression that are triggering (non-zero, non-NaN)
pub fn triggering(results: &[GroupResult]) -> Vec<TagSet> {
    results
        .iter()
        .filter(|r| !r.value.is_nan() && r.value != 0.0)
        .map(|r| r.group.clone())
        .collect()
}

/// Withhold every event of `alert` whose group overlaps a triggering group.
///
/// Returns how many events were marked.
pub fn mark_unevaluated(
    events: &mut HashMap<AlertKey, Event>,
    deps: &[TagSet],
    alert: &str,
) -> usize {
    if deps.is_empty() {
        return 0;
    }
    let mut marked = 0;
    for (ak, event) in events.iter_mut() {
        if ak.name() != alert {
            continue;
        }
        if deps.iter().any(|dep| dep.overlaps(ak.group())) {
            event.unevaluated = true;
            marked += 1;
        }
    }
    marked
}

/// Drop seeded Unknown events of an alert whose evaluation failed
pub fn remove_unknown_events(events: &mut HashMap<AlertKey, Event>, alert: &str) {
    events.retain(|ak, ev| ak.name() != alert || ev.status != Status::Unknown);
}

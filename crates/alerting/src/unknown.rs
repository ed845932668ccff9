//! Unknown Flood Protection

use crate::grouping::group_sets;
use alert_model::AlertKey;
use std::collections::BTreeMap;
use tracing::info;

/// One unit of unknown-alert notification
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownBatch {
    /// A single group sent on its own
    Group { name: String, keys: Vec<AlertKey> },
    /// Every group past the threshold folded together
    Digest { groups: BTreeMap<String, Vec<AlertKey>> },
}

/// Batch unknown keys into group notifications.
///
/// The first `threshold` groups are sent individually. Past that, the rest
/// fold into one digest, unless exactly one group remains. A threshold of
/// zero disables folding.
pub fn batch_unknowns(keys: &[AlertKey], threshold: usize, min_group: usize) -> Vec<UnknownBatch> {
    let groups = group_sets(keys, min_group);
    let total = groups.len();

    if threshold == 0 || total <= threshold {
        return groups
            .into_iter()
            .map(|(name, keys)| UnknownBatch::Group { name, keys })
            .collect();
    }

    let mut batches = Vec::with_capacity(threshold + 1);
    let mut rest = BTreeMap::new();
    for (i, (name, keys)) in groups.into_iter().enumerate() {
        if i < threshold {
            batches.push(UnknownBatch::Group { name, keys });
        } else {
            rest.insert(name, keys);
        }
    }

    if rest.len() == 1 {
        if let Some((name, keys)) = rest.pop_first() {
            batches.push(UnknownBatch::Group { name, keys });
        }
    } else {
        info!(
            "Unknown threshold {} reached, folding {} groups into a digest",
            threshold,
            rest.len()
        );
        batches.push(UnknownBatch::Digest { groups: rest });
    }
    batches
}

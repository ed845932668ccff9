//! Greedy Tag-Pair Grouping

use alert_model::AlertKey;
use std::collections::{BTreeMap, BTreeSet};

/// Group keys by their most widely shared tag pair.
///
/// Repeatedly picks the `(tag, value)` pair carried by the most ungrouped
/// keys and emits it as `{tag=value}` while it covers at least `min_group`
/// keys (never fewer than two). Leftover keys group by alert name; a lone
/// key is keyed by its own text. Ties go to the lowest pair.
pub fn group_sets(keys: &[AlertKey], min_group: usize) -> BTreeMap<String, Vec<AlertKey>> {
    let min_group = min_group.max(2);
    let mut groups = BTreeMap::new();
    let mut seen = BTreeSet::new();

    loop {
        let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            if seen.contains(&i) {
                continue;
            }
            for pair in key.group().iter() {
                *counts.entry(pair).or_default() += 1;
            }
        }

        let mut best: Option<((&str, &str), usize)> = None;
        for (pair, count) in counts {
            if best.map_or(true, |(_, max)| count > max) {
                best = Some((pair, count));
            }
        }
        let Some(((tag, value), count)) = best else {
            break;
        };
        if count < min_group {
            break;
        }

        let mut group = Vec::with_capacity(count);
        for (i, key) in keys.iter().enumerate() {
            if !seen.contains(&i) && key.group().get(tag) == Some(value) {
                seen.insert(i);
                group.push(key.clone());
            }
        }
        groups.insert(format!("{{{}={}}}", tag, value), group);
    }

    let mut by_alert: BTreeMap<&str, Vec<AlertKey>> = BTreeMap::new();
    for (i, key) in keys.iter().enumerate() {
        if !seen.contains(&i) {
            by_alert.entry(key.name()).or_default().push(key.clone());
        }
    }
    for (name, aks) in by_alert {
        if aks.len() > 1 {
            groups.insert(name.to_string(), aks);
        } else {
            for ak in aks {
                groups.insert(ak.to_string(), vec![ak]);
            }
        }
    }

    groups
}

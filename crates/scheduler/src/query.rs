//! State Queries and Grouped Export

use crate::schedule::Schedule;
use alert_model::{AlertKey, AlertRule, State, Status};
use alerting::group_sets;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use thiserror::Error;

/// State filter parse errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("Unknown filter key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Ack(bool),
    Notify(String),
    Status(Status),
    Text(String),
}

/// Space-separated terms, all of which must hold.
///
/// `ack:true|false`, `notify:name`, `status:name` or bare text matched
/// against key and subject. A leading `!` negates a term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(bool, Term)>,
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut terms = Vec::new();
        for token in s.split_whitespace() {
            let (negate, token) = match token.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            let invalid = |key: &str, value: &str| FilterError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            };
            let term = match token.split_once(':') {
                None => Term::Text(token.to_lowercase()),
                Some(("ack", value)) => {
                    Term::Ack(value.parse().map_err(|_| invalid("ack", value))?)
                }
                Some(("notify", value)) => Term::Notify(value.to_string()),
                Some(("status", value)) => {
                    Term::Status(value.parse().map_err(|_| invalid("status", value))?)
                }
                Some((key, _)) => return Err(FilterError::UnknownKey(key.to_string())),
            };
            terms.push((negate, term));
        }
        Ok(Self { terms })
    }
}

impl Filter {
    pub fn matches(&self, rule: Option<&AlertRule>, state: &State) -> bool {
        self.terms.iter().all(|(negate, term)| {
            let hit = match term {
                Term::Ack(acked) => state.need_ack != *acked,
                Term::Notify(name) => rule.map_or(false, |r| {
                    r.crit_notification
                        .iter()
                        .chain(&r.warn_notification)
                        .any(|n| n.contains(name.as_str()))
                }),
                Term::Status(status) => state.abnormal_status() == *status,
                Term::Text(text) => {
                    state.key.to_string().to_lowercase().contains(text)
                        || state.subject.to_lowercase().contains(text)
                }
            };
            hit != *negate
        })
    }
}

/// One row of the grouped export: a single key or a group of keys
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateGroup {
    pub active: bool,
    pub status: Status,
    pub silenced: bool,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_key: Option<AlertKey>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StateGroup>,
}

impl StateGroup {
    fn leaf(state: &State, silenced: bool) -> Self {
        Self {
            active: state.is_active(),
            status: state.abnormal_status(),
            silenced,
            subject: state.subject.clone(),
            alert_key: Some(state.key.clone()),
            children: Vec::new(),
        }
    }

    fn parent(subject: String, children: Vec<StateGroup>) -> Self {
        Self {
            active: children.iter().any(|c| c.active),
            status: children.iter().map(|c| c.status).max().unwrap_or_default(),
            silenced: children.iter().all(|c| c.silenced),
            subject,
            alert_key: None,
            children,
        }
    }
}

/// Active first, then severity, key and subject
fn export_order(a: &StateGroup, b: &StateGroup) -> Ordering {
    b.active
        .cmp(&a.active)
        .then(b.status.cmp(&a.status))
        .then_with(|| a.alert_key.cmp(&b.alert_key))
        .then_with(|| a.subject.cmp(&b.subject))
}

/// Open incidents split by acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateGroups {
    pub need_ack: Vec<StateGroup>,
    pub acknowledged: Vec<StateGroup>,
}

impl Schedule {
    /// Copy of one key's state
    pub fn state(&self, ak: &AlertKey) -> Option<State> {
        self.lock().states.get(ak).cloned()
    }

    /// Copy of every tracked state, ordered by key
    pub fn states(&self) -> Vec<State> {
        let mut states: Vec<_> = self.lock().states.values().cloned().collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        states
    }

    /// Open states matching `filter`, grouped for display
    pub fn marshal_groups(&self, filter: &str, now: DateTime<Utc>) -> Result<StateGroups, FilterError> {
        let filter: Filter = filter.parse()?;
        let silenced = self.silenced(now);

        let (need_ack, acknowledged) = {
            let inner = self.lock();
            let mut need_ack = Vec::new();
            let mut acknowledged = Vec::new();
            for state in inner.states.values() {
                if !state.open || !filter.matches(self.rules.alert(state.key.name()), state) {
                    continue;
                }
                let leaf = StateGroup::leaf(state, silenced.contains_key(&state.key));
                if state.need_ack {
                    need_ack.push(leaf);
                } else {
                    acknowledged.push(leaf);
                }
            }
            (need_ack, acknowledged)
        };

        Ok(StateGroups {
            need_ack: self.group_leaves(need_ack),
            acknowledged: self.group_leaves(acknowledged),
        })
    }

    /// Group unsilenced active leaves of equal severity by shared tags.
    ///
    /// Silenced and resolved leaves are never folded into a parent.
    fn group_leaves(&self, leaves: Vec<StateGroup>) -> Vec<StateGroup> {
        let mut groups = Vec::new();
        let mut by_status: BTreeMap<Status, Vec<StateGroup>> = BTreeMap::new();
        for leaf in leaves {
            if leaf.active && !leaf.silenced && leaf.status.is_abnormal() {
                by_status.entry(leaf.status).or_default().push(leaf);
            } else {
                groups.push(leaf);
            }
        }
        for bucket in by_status.into_values() {
            groups.extend(self.group_bucket(bucket));
        }
        groups.sort_by(export_order);
        groups
    }

    fn group_bucket(&self, leaves: Vec<StateGroup>) -> Vec<StateGroup> {
        let keys: Vec<AlertKey> = leaves.iter().filter_map(|l| l.alert_key.clone()).collect();
        let mut by_key: HashMap<AlertKey, StateGroup> = leaves
            .into_iter()
            .filter_map(|l| Some((l.alert_key.clone()?, l)))
            .collect();

        let mut groups = Vec::new();
        for (name, aks) in group_sets(&keys, self.config.min_group_size) {
            let mut children: Vec<_> = aks.iter().filter_map(|ak| by_key.remove(ak)).collect();
            if children.len() == 1 {
                groups.append(&mut children);
                continue;
            }
            children.sort_by(export_order);
            groups.push(StateGroup::parent(name, children));
        }
        groups
    }
}

//! Alert Rule and Notification Definitions
//!
//! These are the already-parsed shapes the scheduler consumes; the rule
//! language itself lives with the expression executor.

use crate::{Status, TagSet};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Expression attached to a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expr {
    /// Backend query, executed by the expression executor
    Query(String),
    /// Current result of another alert, resolved by name
    Alert(String),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Query(text) => f.write_str(text),
            Expr::Alert(name) => write!(f, "alert(\"{}\")", name),
        }
    }
}

/// Groups excluded from evaluation, as tag glob patterns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Squelch(pub Vec<TagSet>);

impl Squelch {
    /// True when any entry's patterns all match the group
    pub fn squelched(&self, group: &TagSet) -> bool {
        self.0.iter().any(|patterns| {
            !patterns.is_empty()
                && patterns.iter().all(|(tag, pattern)| {
                    match (group.get(tag), Pattern::new(pattern)) {
                        (Some(value), Ok(p)) => p.matches(value),
                        _ => false,
                    }
                })
        })
    }
}

fn default_run_every() -> u32 {
    1
}

/// Alert rule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    #[serde(default)]
    pub crit: Option<Expr>,
    #[serde(default)]
    pub warn: Option<Expr>,
    /// Triggering groups withhold overlapping keys of this alert
    #[serde(default)]
    pub depends: Option<Expr>,
    #[serde(default)]
    pub crit_notification: Vec<String>,
    #[serde(default)]
    pub warn_notification: Vec<String>,
    /// Untouched time before a key goes Unknown
    #[serde(default, with = "humantime_serde")]
    pub unknown: Option<Duration>,
    /// Evaluate every Nth cycle
    #[serde(default = "default_run_every")]
    pub run_every: u32,
    #[serde(default)]
    pub squelch: Squelch,
    /// Auto-close and forget keys that go Unknown
    #[serde(default)]
    pub ignore_unknown: bool,
    /// Record only: never opened, never notified
    #[serde(default)]
    pub log: bool,
    /// Template name handed to the renderer
    #[serde(default)]
    pub template: String,
}

impl AlertRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            crit: None,
            warn: None,
            depends: None,
            crit_notification: Vec::new(),
            warn_notification: Vec::new(),
            unknown: None,
            run_every: default_run_every(),
            squelch: Squelch::default(),
            ignore_unknown: false,
            log: false,
            template: String::new(),
        }
    }

    /// Notification names configured for a status
    pub fn notifications_for(&self, status: Status) -> &[String] {
        match status {
            Status::Critical | Status::Unknown => &self.crit_notification,
            Status::Warning => &self.warn_notification,
            _ => &[],
        }
    }

    /// Expressions referenced by this rule, in evaluation order
    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.depends
            .iter()
            .chain(self.crit.iter())
            .chain(self.warn.iter())
    }
}

/// Notification definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDef {
    /// Referenced by alert rules and by other definitions' `next`
    #[serde(default)]
    pub name: String,
    /// Recipient handed to the transport (address, URL, ...)
    #[serde(default)]
    pub target: String,
    /// Delay before this notification fires once queued as a successor
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Successor queued after every dispatch
    #[serde(default)]
    pub next: Option<String>,
    /// Include the computation trace in plain bodies
    #[serde(default)]
    pub print: bool,
}

impl NotificationDef {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            timeout: None,
            next: None,
            print: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squelch() {
        let squelch = Squelch(vec!["host=test*".parse().unwrap()]);
        assert!(squelch.squelched(&"host=test01".parse().unwrap()));
        assert!(!squelch.squelched(&"host=prod01".parse().unwrap()));
        assert!(!squelch.squelched(&"dc=ny".parse().unwrap()));
        assert!(!Squelch::default().squelched(&TagSet::new()));
    }

    #[test]
    fn test_notifications_for() {
        let mut rule = AlertRule::new("a");
        rule.crit_notification = vec!["ops".to_string()];
        rule.warn_notification = vec!["dev".to_string()];
        assert_eq!(rule.notifications_for(Status::Unknown), ["ops".to_string()]);
        assert_eq!(rule.notifications_for(Status::Warning), ["dev".to_string()]);
        assert!(rule.notifications_for(Status::Error).is_empty());
    }

    #[test]
    fn test_rule_deserialize() {
        let json = r#"{
            "name": "cpu",
            "crit": {"query": "avg(q(cpu)) > 90"},
            "depends": {"alert": "host.down"},
            "crit_notification": ["ops"],
            "unknown": "10m"
        }"#;
        let rule: AlertRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.depends, Some(Expr::Alert("host.down".to_string())));
        assert_eq!(rule.unknown, Some(Duration::from_secs(600)));
        assert_eq!(rule.run_every, 1);
    }
}

//! Schedule Settings and Rule Set

use alert_model::{AlertRule, Expr, NotificationDef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Rule set validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("Duplicate alert {0}")]
    DuplicateAlert(String),
    #[error("Alert {alert} references undefined notification {notification}")]
    UndefinedNotification { alert: String, notification: String },
    #[error("Notification {notification} chains to undefined {next}")]
    UndefinedNext { notification: String, next: String },
    #[error("Alert {alert} references undefined alert {target}")]
    UndefinedAlert { alert: String, target: String },
    #[error("Alert {0} has run_every of zero")]
    ZeroRunEvery(String),
    #[error("Notification {notification} chains to {next}, which has no timeout")]
    ZeroTimeoutNext { notification: String, next: String },
    #[error("check_frequency must be greater than zero")]
    ZeroCheckFrequency,
}

fn default_check_frequency() -> Duration {
    Duration::from_secs(60)
}

fn default_unknown_threshold() -> usize {
    5
}

fn default_min_group_size() -> usize {
    2
}

fn default_save_debounce() -> Duration {
    Duration::from_secs(5)
}

fn default_max_notify_wait() -> Duration {
    Duration::from_secs(3600)
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Evaluation cycle cadence (default: 60s)
    #[serde(default = "default_check_frequency", with = "humantime_serde")]
    pub check_frequency: Duration,
    /// Unknown groups sent individually before folding into a digest
    #[serde(default = "default_unknown_threshold")]
    pub unknown_threshold: usize,
    /// Smallest tag-pair group worth forming
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
    /// Delay collapsing bursts of snapshot writes (default: 5s)
    #[serde(default = "default_save_debounce", with = "humantime_serde")]
    pub save_debounce: Duration,
    /// Longest the notification loop sleeps without a signal
    #[serde(default = "default_max_notify_wait", with = "humantime_serde")]
    pub max_notify_wait: Duration,
    /// Evaluate and track state but never deliver
    #[serde(default)]
    pub quiet: bool,
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.check_frequency.is_zero() {
            return Err(RuleError::ZeroCheckFrequency);
        }
        Ok(())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_frequency: default_check_frequency(),
            unknown_threshold: default_unknown_threshold(),
            min_group_size: default_min_group_size(),
            save_debounce: default_save_debounce(),
            max_notify_wait: default_max_notify_wait(),
            quiet: false,
        }
    }
}

/// Validated, ordered alert rules and notification definitions
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    alerts: Vec<AlertRule>,
    index: HashMap<String, usize>,
    notifications: HashMap<String, NotificationDef>,
}

impl RuleSet {
    /// Build a rule set, checking every cross reference
    pub fn new(
        alerts: Vec<AlertRule>,
        notifications: impl IntoIterator<Item = NotificationDef>,
    ) -> Result<Self, RuleError> {
        let notifications: HashMap<_, _> = notifications
            .into_iter()
            .map(|n| (n.name.clone(), n))
            .collect();

        for n in notifications.values() {
            if let Some(next) = &n.next {
                let Some(target) = notifications.get(next) else {
                    return Err(RuleError::UndefinedNext {
                        notification: n.name.clone(),
                        next: next.clone(),
                    });
                };
                // Successors wait for their own timeout
                if target.timeout().is_zero() {
                    return Err(RuleError::ZeroTimeoutNext {
                        notification: n.name.clone(),
                        next: next.clone(),
                    });
                }
            }
        }

        let mut index = HashMap::with_capacity(alerts.len());
        for (i, rule) in alerts.iter().enumerate() {
            if index.insert(rule.name.clone(), i).is_some() {
                return Err(RuleError::DuplicateAlert(rule.name.clone()));
            }
            if rule.run_every == 0 {
                return Err(RuleError::ZeroRunEvery(rule.name.clone()));
            }
            for name in rule.crit_notification.iter().chain(&rule.warn_notification) {
                if !notifications.contains_key(name) {
                    return Err(RuleError::UndefinedNotification {
                        alert: rule.name.clone(),
                        notification: name.clone(),
                    });
                }
            }
        }

        for rule in &alerts {
            for expr in rule.exprs() {
                if let Expr::Alert(target) = expr {
                    if !index.contains_key(target) || target == &rule.name {
                        return Err(RuleError::UndefinedAlert {
                            alert: rule.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        info!(
            "Loaded {} alerts and {} notifications",
            alerts.len(),
            notifications.len()
        );
        Ok(Self {
            alerts,
            index,
            notifications,
        })
    }

    /// Alerts in configured order
    pub fn alerts(&self) -> &[AlertRule] {
        &self.alerts
    }

    pub fn alert(&self, name: &str) -> Option<&AlertRule> {
        self.index.get(name).map(|&i| &self.alerts[i])
    }

    pub fn notification(&self, name: &str) -> Option<&NotificationDef> {
        self.notifications.get(name)
    }
}

//! Alert Scheduler
//!
//! Runs periodic evaluation cycles over alert rules, tracks per-key state,
//! resolves dependencies between alerts and schedules notifications with
//! escalation, silencing and unknown-flood protection.

mod action;
mod check;
mod config;
mod dependency;
mod executor;
mod history;
mod notify;
mod query;
mod schedule;
mod silence;
mod transition;

pub use action::ActionError;
pub use check::CheckReport;
pub use config::{RuleError, RuleSet, ScheduleConfig};
pub use dependency::{mark_unevaluated, triggering};
pub use executor::{ExecContext, ExecError, Executor, GroupResult};
pub use history::{PriorStatuses, RunHistory};
pub use notify::NotificationPlan;
pub use query::{Filter, FilterError, StateGroup, StateGroups};
pub use schedule::Schedule;
pub use silence::{SilenceError, SilenceRequest};

use storage::StorageError;
use thiserror::Error;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedError {
    /// Another evaluation cycle holds the single-flight guard
    #[error("Check already running")]
    CheckRunning,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

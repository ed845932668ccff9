//! Alert Model
//!
//! Identity, status, per-key state and silence types shared by the
//! evaluation and notification engines.

mod key;
mod rule;
mod silence;
mod state;
mod status;

pub use key::{AlertKey, TagSet};
pub use rule::{AlertRule, Expr, NotificationDef, Squelch};
pub use silence::Silence;
pub use state::{Action, ActionType, Attachment, State};
pub use status::{Computation, EvalResult, Event, Status};

use thiserror::Error;

/// Model parsing errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Tag set text could not be parsed
    #[error("Invalid tag set: {0}")]
    InvalidTagSet(String),

    /// Alert key text could not be parsed
    #[error("Invalid alert key: {0}")]
    InvalidAlertKey(String),

    /// Unknown status name
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// Unknown action type
    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    /// Silence tag pattern is not a valid glob
    #[error("Invalid pattern for tag {tag}: {pattern}")]
    InvalidPattern { tag: String, pattern: String },
}

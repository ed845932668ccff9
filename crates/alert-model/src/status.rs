//! Evaluation Status and Events

use crate::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-cycle evaluation outcome.
///
/// The ordering is significant: Unknown ranks above Critical, so an
/// Unknown cycle escalates (and re-notifies) a previously Critical key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    None,
    Normal,
    Warning,
    Critical,
    Unknown,
    Error,
}

impl Status {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::None => "none",
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Critical => "critical",
            Status::Unknown => "unknown",
            Status::Error => "error",
        }
    }

    /// Anything worse than Normal
    pub fn is_abnormal(&self) -> bool {
        *self > Status::Normal
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Status::None),
            "normal" => Ok(Status::Normal),
            "warning" => Ok(Status::Warning),
            "critical" => Ok(Status::Critical),
            "unknown" => Ok(Status::Unknown),
            "error" => Ok(Status::Error),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

/// One step of an expression's computation trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    pub text: String,
    pub value: f64,
}

/// Raw value and trace behind a Warn/Crit/Error classification
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvalResult {
    /// Numeric result for the group (NaN for errors)
    pub value: f64,
    /// Expression text that produced the value
    pub expr: String,
    /// Computation trace
    pub computations: Vec<Computation>,
}

impl EvalResult {
    /// Error payload carrying a message as its only computation
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            value: f64::NAN,
            expr: String::new(),
            computations: vec![Computation {
                text: message.into(),
                value: f64::NAN,
            }],
        }
    }
}

/// One cycle's outcome for one alert key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub status: Status,
    pub time: DateTime<Utc>,
    pub warn: Option<EvalResult>,
    pub crit: Option<EvalResult>,
    pub error: Option<EvalResult>,
    /// Result withheld because an upstream dependency is triggering
    pub unevaluated: bool,
}

impl Event {
    /// Create a bare event with the given status
    pub fn new(status: Status, time: DateTime<Utc>) -> Self {
        Self {
            status,
            time,
            warn: None,
            crit: None,
            error: None,
            unevaluated: false,
        }
    }
}

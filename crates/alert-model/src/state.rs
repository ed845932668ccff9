//! Per-Key Alert State

use crate::{AlertKey, Event, ModelError, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User or scheduler action applied to an alert key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    #[serde(alias = "ack")]
    Acknowledge,
    Close,
    Forget,
    ForceClose,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Acknowledge => "acknowledge",
            ActionType::Close => "close",
            ActionType::Forget => "forget",
            ActionType::ForceClose => "forceclose",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ack" | "acknowledge" => Ok(ActionType::Acknowledge),
            "close" => Ok(ActionType::Close),
            "forget" => Ok(ActionType::Forget),
            "forceclose" => Ok(ActionType::ForceClose),
            _ => Err(ModelError::UnknownAction(s.to_string())),
        }
    }
}

/// Entry of a key's action log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub user: String,
    pub message: String,
    pub kind: ActionType,
    pub time: DateTime<Utc>,
}

/// Rendered notification attachment (e.g. an inline graph)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Persistent aggregate for one alert key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub key: AlertKey,
    /// Run-length compressed event history (oldest first)
    pub history: Vec<Event>,
    /// Action log (oldest first)
    pub actions: Vec<Action>,
    /// Incident is open and shown to operators
    pub open: bool,
    /// Waiting for an operator to acknowledge
    pub need_ack: bool,
    /// Closed automatically or by ActionForget
    pub forgotten: bool,
    /// Last event was withheld by a dependency
    pub unevaluated: bool,
    /// Last time a result arrived for this key
    pub touched: DateTime<Utc>,
    pub subject: String,
    pub body: String,
    pub email_subject: String,
    pub email_body: String,
    pub attachments: Vec<Attachment>,
}

impl State {
    /// Create an empty state for a key first seen at `now`
    pub fn new(key: AlertKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            history: Vec::new(),
            actions: Vec::new(),
            open: false,
            need_ack: false,
            forgotten: false,
            unevaluated: false,
            touched: now,
            subject: String::new(),
            body: String::new(),
            email_subject: String::new(),
            email_body: String::new(),
            attachments: Vec::new(),
        }
    }

    /// Most recent history entry
    pub fn last(&self) -> Option<&Event> {
        self.history.last()
    }

    /// Current status (None when no history)
    pub fn status(&self) -> Status {
        self.last().map_or(Status::None, |e| e.status)
    }

    /// Most recent status worse than Normal, else None
    pub fn abnormal_status(&self) -> Status {
        self.history
            .iter()
            .rev()
            .map(|e| e.status)
            .find(Status::is_abnormal)
            .unwrap_or(Status::None)
    }

    pub fn is_active(&self) -> bool {
        self.status().is_abnormal()
    }

    /// Append an event, returning the previous status.
    ///
    /// The event is recorded only when its status differs from the last
    /// entry. Its time is clamped so history never goes backwards.
    pub fn append(&mut self, mut event: Event) -> Status {
        let previous = self.status();
        if let Some(last) = self.history.last() {
            if last.status == event.status {
                return previous;
            }
            if event.time < last.time {
                event.time = last.time;
            }
        }
        self.history.push(event);
        previous
    }

    /// Record an action in the log
    pub fn record_action(
        &mut self,
        user: impl Into<String>,
        message: impl Into<String>,
        kind: ActionType,
        time: DateTime<Utc>,
    ) {
        self.actions.push(Action {
            user: user.into(),
            message: message.into(),
            kind,
            time,
        });
    }

    /// Drop rendered notification content
    pub fn clear_rendered(&mut self) {
        self.subject.clear();
        self.body.clear();
        self.email_subject.clear();
        self.email_body.clear();
        self.attachments.clear();
    }
}

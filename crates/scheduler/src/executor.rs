//! Expression Executor Seam

use alert_model::{Computation, TagSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Backend query failures
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("Query failed: {0}")]
    Query(String),
    #[error("Query timed out after {0}ms")]
    Timeout(u64),
}

/// One tag group's numeric result
#[derive(Debug, Clone, PartialEq)]
pub struct GroupResult {
    pub group: TagSet,
    pub value: f64,
    pub computations: Vec<Computation>,
}

impl GroupResult {
    pub fn new(group: TagSet, value: f64) -> Self {
        Self {
            group,
            value,
            computations: Vec::new(),
        }
    }
}

/// Read-only context handed to the executor
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    /// Cycle start; queries are evaluated as of this time
    pub start: DateTime<Utc>,
    /// Alert whose rule is being evaluated
    pub alert: &'a str,
}

/// Executes backend queries for alert rules
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        ctx: &ExecContext<'_>,
    ) -> Result<Vec<GroupResult>, ExecError>;
}

//! Static Query Executor
//!
//! Answers queries from a fixed table loaded from configuration. Stands in
//! for a metrics backend in dry runs and demos.

use alert_model::TagSet;
use async_trait::async_trait;
use scheduler::{ExecContext, ExecError, Executor, GroupResult};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// One canned row: `query` yields `value` for `group`
#[derive(Debug, Clone, Deserialize)]
pub struct StaticResult {
    pub query: String,
    #[serde(default)]
    pub group: TagSet,
    pub value: f64,
}

/// Executor serving canned results by query text
#[derive(Debug, Clone, Default)]
pub struct StaticExecutor {
    results: HashMap<String, Vec<GroupResult>>,
}

impl StaticExecutor {
    pub fn new(rows: &[StaticResult]) -> Self {
        let mut results: HashMap<String, Vec<GroupResult>> = HashMap::new();
        for row in rows {
            results
                .entry(row.query.clone())
                .or_default()
                .push(GroupResult::new(row.group.clone(), row.value));
        }
        Self { results }
    }
}

#[async_trait]
impl Executor for StaticExecutor {
    async fn execute(
        &self,
        query: &str,
        ctx: &ExecContext<'_>,
    ) -> Result<Vec<GroupResult>, ExecError> {
        debug!("{}: executing {}", ctx.alert, query);
        self.results
            .get(query)
            .cloned()
            .ok_or_else(|| ExecError::Query(format!("no results configured for {}", query)))
    }
}

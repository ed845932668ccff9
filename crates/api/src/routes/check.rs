//! Manual Check Route

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub cycle: u64,
    pub events: usize,
    pub errors: usize,
    pub queued: usize,
    pub duration_ms: u64,
}

/// Run one evaluation cycle now; 409 when a cycle is already running
pub async fn post_check(State(state): State<Arc<AppState>>) -> Result<Json<CheckResponse>, ApiError> {
    let report = state.scheduler.check(Utc::now()).await?;
    Ok(Json(CheckResponse {
        cycle: report.cycle,
        events: report.events,
        errors: report.errors,
        queued: report.queued,
        duration_ms: report.duration.as_millis() as u64,
    }))
}

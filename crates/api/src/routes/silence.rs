//! Silence Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use alert_model::Silence;
use chrono::Utc;
use scheduler::SilenceRequest;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

/// Every silence by id
pub async fn get_silences(State(state): State<Arc<AppState>>) -> Json<HashMap<String, Silence>> {
    Json(state.scheduler.silence_list())
}

/// Preview or commit a silence; returns affected keys and whether each is active
pub async fn post_silence(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SilenceRequest>,
) -> Result<Json<BTreeMap<String, bool>>, ApiError> {
    let affected = state.scheduler.add_silence(req, Utc::now())?;
    Ok(Json(
        affected
            .into_iter()
            .map(|(ak, active)| (ak.to_string(), active))
            .collect(),
    ))
}

pub async fn delete_silence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.clear_silence(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

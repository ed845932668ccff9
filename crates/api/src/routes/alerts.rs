//! Alert State Routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use alert_model::{ActionType, AlertKey};
use chrono::Utc;
use scheduler::StateGroups;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

/// Query parameters for the grouped export
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Space-separated filter terms
    #[serde(default)]
    pub filter: String,
}

/// Grouped open incidents
pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertQuery>,
) -> Result<Json<StateGroups>, ApiError> {
    Ok(Json(state.scheduler.marshal_groups(&params.filter, Utc::now())?))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub key: String,
}

/// Full state of one alert key
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatusQuery>,
) -> Result<Json<alert_model::State>, ApiError> {
    let ak: AlertKey = params
        .key
        .parse()
        .map_err(|e: alert_model::ModelError| ApiError::BadRequest(e.to_string()))?;
    state
        .scheduler
        .state(&ak)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No state for {}", ak)))
}

/// Action applied to a list of keys
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub user: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub keys: Vec<AlertKey>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub applied: Vec<AlertKey>,
    /// Rejected keys with the reason
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failed: BTreeMap<String, String>,
}

/// Apply an action to each key; 409 when any key was rejected
pub async fn post_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActionRequest>,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
    if req.user.trim().is_empty() {
        return Err(ApiError::UnprocessableEntity("user is required".to_string()));
    }
    if req.keys.is_empty() {
        return Err(ApiError::UnprocessableEntity("no keys given".to_string()));
    }

    let now = Utc::now();
    let mut response = ActionResponse {
        applied: Vec::new(),
        failed: BTreeMap::new(),
    };
    for ak in req.keys {
        match state
            .scheduler
            .action(&req.user, &req.message, req.kind, &ak, now)
        {
            Ok(()) => response.applied.push(ak),
            Err(e) => {
                response.failed.insert(ak.to_string(), e.to_string());
            }
        }
    }
    metrics::counter!("api.actions.applied").increment(response.applied.len() as u64);
    metrics::counter!("api.actions.rejected").increment(response.failed.len() as u64);
    let status = if response.failed.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(response)))
}

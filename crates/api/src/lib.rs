//! Alert Scheduler API Server
//!
//! REST API over the scheduler: grouped incidents, per-key state, actions,
//! silences, manual checks and Prometheus metrics.

use anyhow::Context;
use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use scheduler::Schedule;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use storage::{MemoryStore, SqliteStore, StateStore};
use tower_governor::GovernorLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
mod error;
pub mod executor;
pub mod rate_limit;
mod routes;

pub use config::AppConfig;
pub use error::ApiError;
pub use executor::StaticExecutor;

use config::LoggingConfig;
use rate_limit::{create_governor_config, RateLimitConfig};

/// Application state shared across handlers
pub struct AppState {
    pub scheduler: Arc<Schedule>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    pub prometheus: PrometheusHandle,
}

impl AppState {
    pub fn new(scheduler: Arc<Schedule>, prometheus: PrometheusHandle) -> Self {
        Self {
            scheduler,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            prometheus,
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub cycles: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub states: usize,
    pub silences: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, limits: &RateLimitConfig) -> Router {
    let mut guarded = Router::new()
        .route("/api/action", post(routes::alerts::post_action))
        .route("/api/check", post(routes::check::post_check));
    if limits.enabled {
        match create_governor_config(limits) {
            Some(config) => guarded = guarded.layer(GovernorLayer { config }),
            None => warn!("Invalid rate limit settings; action routes are unthrottled"),
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE]);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/alerts", get(routes::alerts::get_alerts))
        .route("/api/status", get(routes::alerts::get_status))
        .route(
            "/api/silence",
            get(routes::silence::get_silences).post(routes::silence::post_silence),
        )
        .route("/api/silence/:id", delete(routes::silence::delete_silence))
        .route("/metrics", get(metrics_handler))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sched = &state.scheduler;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        cycles: sched.cycles(),
        last_check: sched.last_check(),
        states: sched.states().len(),
        silences: sched.silence_list().len(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    (StatusCode::OK, state.prometheus.render())
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);
    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Run the scheduler and the server until interrupted
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;
    let rules = config.rule_set().context("validating alert rules")?;

    let store: Arc<dyn StateStore> = match &config.storage.url {
        Some(url) => Arc::new(
            SqliteStore::connect(url)
                .await
                .with_context(|| format!("opening {}", url))?,
        ),
        None => {
            warn!("No storage url configured; state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    let executor = Arc::new(StaticExecutor::new(&config.executor.results));

    let scheduler = Arc::new(Schedule::new(
        rules,
        config.schedule.clone(),
        executor,
        Arc::clone(&store),
    ));
    if let Err(e) = scheduler.restore().await {
        error!("Failed to restore state, starting empty: {}", e);
    }
    let loops = scheduler.start();

    let state = Arc::new(AppState::new(Arc::clone(&scheduler), prometheus));
    let app = create_router(state, &config.server.rate_limit);

    info!("Starting API server on {}", config.server.listen_address);
    let listener = tokio::net::TcpListener::bind(&config.server.listen_address)
        .await
        .with_context(|| format!("binding {}", config.server.listen_address))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for handle in loops {
        handle.abort();
    }
    scheduler.save().await.context("saving final snapshot")?;
    info!("Scheduler stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_model::{AlertRule, Expr, NotificationDef};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use crate::executor::StaticResult;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use scheduler::{RuleSet, ScheduleConfig};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let mut rule = AlertRule::new("cpu");
        rule.crit = Some(Expr::Query("load".to_string()));
        rule.crit_notification = vec!["ops".to_string()];
        let rules = RuleSet::new(vec![rule], vec![NotificationDef::new("ops", "ops")]).unwrap();
        let executor = Arc::new(StaticExecutor::new(&[
            StaticResult {
                query: "load".to_string(),
                group: "host=web01".parse().unwrap(),
                value: 1.0,
            },
            StaticResult {
                query: "load".to_string(),
                group: "host=web02".parse().unwrap(),
                value: 0.0,
            },
        ]));
        let scheduler = Arc::new(Schedule::new(
            rules,
            ScheduleConfig::default(),
            executor,
            Arc::new(MemoryStore::new()),
        ));
        let prometheus = PrometheusBuilder::new().build_recorder().handle();
        let state = Arc::new(AppState::new(scheduler, prometheus));
        create_router(state, &RateLimitConfig::disabled())
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = send(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cycles"], 0);
    }

    #[tokio::test]
    async fn test_check_then_export() {
        let app = app();
        let (status, body) = send(&app, Method::POST, "/api/check", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cycle"], 1);
        assert_eq!(body["queued"], 1);

        let (status, body) = send(&app, Method::GET, "/api/alerts", None).await;
        assert_eq!(status, StatusCode::OK);
        let need_ack = body["need_ack"].as_array().unwrap();
        assert_eq!(need_ack.len(), 1);
        assert_eq!(need_ack[0]["alert_key"], "cpu{host=web01}");
        assert_eq!(need_ack[0]["status"], "critical");

        let (status, _) = send(&app, Method::GET, "/api/alerts?filter=owner:me", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_lookup() {
        let app = app();
        send(&app, Method::POST, "/api/check", None).await;

        let (status, body) =
            send(&app, Method::GET, "/api/status?key=cpu%7Bhost%3Dweb01%7D", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["open"], true);

        let (status, _) = send(&app, Method::GET, "/api/status?key=cpu%7Bhost%3Dnone%7D", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, "/api/status?key=garbage", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_acknowledge_twice_conflicts() {
        let app = app();
        send(&app, Method::POST, "/api/check", None).await;
        let ack = json!({ "user": "ops", "type": "ack", "keys": ["cpu{host=web01}"] });

        let (status, body) = send(&app, Method::POST, "/api/action", Some(ack.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"][0], "cpu{host=web01}");

        let (status, body) = send(&app, Method::POST, "/api/action", Some(ack)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["failed"]["cpu{host=web01}"].is_string());

        let (_, body) = send(&app, Method::GET, "/api/alerts", None).await;
        assert_eq!(body["acknowledged"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_silence_lifecycle() {
        let app = app();
        send(&app, Method::POST, "/api/check", None).await;
        let now = Utc::now();
        let mut req = json!({
            "start": (now - chrono::Duration::minutes(1)).to_rfc3339(),
            "end": (now + chrono::Duration::hours(1)).to_rfc3339(),
            "alert": "cpu",
            "user": "ops",
        });

        let (status, body) = send(&app, Method::POST, "/api/silence", Some(req.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cpu{host=web01}"], true);
        assert_eq!(body["cpu{host=web02}"], false);

        req["confirm"] = json!(true);
        send(&app, Method::POST, "/api/silence", Some(req)).await;
        let (_, list) = send(&app, Method::GET, "/api/silence", None).await;
        let ids: Vec<String> = list.as_object().unwrap().keys().cloned().collect();
        assert_eq!(ids.len(), 1);

        let uri = format!("/api/silence/{}", ids[0]);
        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::POST, "/api/silence", Some(json!({ "alert": "cpu" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = app();
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

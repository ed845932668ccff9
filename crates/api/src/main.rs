//! Alert Scheduler - Main Entry Point

use anyhow::Context;
use api::{init_logging, run_server, AppConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/scheduler.toml".to_string());
    let config = AppConfig::load(&path).with_context(|| format!("loading {}", path))?;
    init_logging(&config.logging)?;

    info!("=== Alert Scheduler v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "{} alerts, {} notifications, checking every {:?}",
        config.alerts.len(),
        config.notifications.len(),
        config.schedule.check_frequency
    );

    run_server(config).await
}

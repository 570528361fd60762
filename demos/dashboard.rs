//! Headless dashboard: connects to the broker, keeps two views supervised and
//! logs what the service sends back.
//!
//! ```text
//! TRACEABILITY_MQTT_BROKER=10.0.0.5 RUST_LOG=info cargo run --example dashboard
//! TRACEABILITY_CONFIG=client.json cargo run --example dashboard
//! ```

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use traceability_bus::model::{Movement, Part, SystemStats};
use traceability_bus::topics::Route;
use traceability_bus::{ClientConfig, ConnectionSupervisor, SupervisorConfig, TraceabilityClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match std::env::var("TRACEABILITY_CONFIG") {
        Ok(path) => ClientConfig::load(path)?,
        Err(_) => ClientConfig::from_env()?,
    };
    info!(host = %config.broker.host, port = config.broker.port, "starting dashboard");

    let client = TraceabilityClient::mqtt(config)?;

    client.subscribe_rows::<SystemStats, _>(Route::SystemStats, |stats| {
        if let Some(stats) = stats.first() {
            info!(
                parts = stats.total_parts,
                stations = stats.total_stations,
                operators = stats.total_operators,
                movements_24h = stats.movements_24h,
                "system stats"
            );
        }
    });
    client.subscribe_rows::<Movement, _>(Route::StationActivity, |movements| {
        info!(count = movements.len(), "recent activity");
    });
    client.subscribe_rows::<Part, _>(Route::PartList, |parts| {
        for part in &parts {
            info!(part = %part.part_id, status = ?part.status, "part");
        }
    });

    let dashboard = ConnectionSupervisor::new("dashboard", client.clone())
        .with_config(SupervisorConfig {
            refresh_interval: Some(Duration::from_secs(15)),
            ..client.config().supervisor.clone()
        })
        .on_connected(|client| {
            client.get_system_stats()?;
            client.get_station_activity(None, None)
        })
        .spawn();

    let parts = ConnectionSupervisor::new("parts", client.clone())
        .on_connected(|client| client.list_parts())
        .spawn();

    tokio::signal::ctrl_c().await?;

    let stats = dashboard.stop().await;
    info!(?stats, "dashboard view stopped");
    let stats = parts.stop().await;
    info!(?stats, "parts view stopped");

    client.disconnect();
    Ok(())
}

//! Capture Coordinator - multi-stream camera resource daemon
//!
//! Runs next to the camera service on the device, polling the thermal zone,
//! applying mitigations and serving health, metrics and control endpoints.

use anyhow::Result;
use capture_coordinator::{api, config::DaemonConfig};
use coordinator_lib::{
    coordinator::CaptureCoordinator,
    events::CoordinatorEvent,
    health::HealthRegistry,
    models::CaptureConfiguration,
    observability::StructuredLogger,
    owner::LoggingStreamOwner,
    thermal::SysfsThermalSource,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const COORDINATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting capture-coordinator");

    let config = DaemonConfig::load()?;
    info!(
        device = %config.coordinator.device_name,
        thermal_zone = %config.thermal_zone,
        "Coordinator configured"
    );

    let logger = StructuredLogger::new(config.coordinator.device_name.clone());
    logger.log_startup(COORDINATOR_VERSION);

    let health_registry = HealthRegistry::new();
    let (coordinator, events) = CaptureCoordinator::builder()
        .config(config.coordinator.clone())
        .owner(Arc::new(LoggingStreamOwner))
        .health(health_registry.clone())
        .build()?;
    let coordinator = Arc::new(coordinator);
    coordinator.register_health().await;

    if !config.streams.is_empty() {
        let outcome =
            coordinator.admit_configuration(&CaptureConfiguration::new(config.streams.clone()));
        info!(
            admitted = outcome.admitted.len(),
            rejected = outcome.rejected.len(),
            used_fallback = outcome.used_fallback,
            "Initial streams admitted"
        );
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let source = Arc::new(SysfsThermalSource::new(&config.thermal_zone));
    let monitor = coordinator.thermal_monitor(source);
    let monitor_handle = tokio::spawn(monitor.run(shutdown_tx.subscribe()));
    let events_handle = tokio::spawn(log_events(events, shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        coordinator.clone(),
    ));

    // Mark coordinator as ready after initialization
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "Thermal monitor task failed");
    }
    if let Err(e) = events_handle.await {
        warn!(error = %e, "Event task failed");
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Drain coordinator events into the log until shutdown
async fn log_events(
    mut events: mpsc::Receiver<CoordinatorEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    CoordinatorEvent::MitigationApplied { state, affected_streams, mitigations } => {
                        info!(
                            state = %state,
                            mitigations = mitigations.len(),
                            affected = ?affected_streams,
                            "Mitigation plan applied"
                        );
                    }
                    other => debug!(kind = other.kind(), "Coordinator event"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

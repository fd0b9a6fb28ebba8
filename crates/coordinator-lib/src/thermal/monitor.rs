//! Thermal monitor loop
//!
//! Polls a [`ThermalSignalSource`] on a fixed interval and feeds every
//! sample into the [`ThermalAdapter`], so the history reflects how long a
//! state persisted. Platforms that push notifications call
//! `ThermalAdapter::handle_signal` directly instead.

use super::{ThermalAdapter, ThermalState, TransitionReport};
use crate::error::{CoordinatorError, Result};
use crate::health::{components, HealthRegistry};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default sysfs thermal zone
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

const FAIR_THRESHOLD_C: f64 = 60.0;
const SERIOUS_THRESHOLD_C: f64 = 70.0;
const CRITICAL_THRESHOLD_C: f64 = 80.0;

/// Source of the platform's current thermal severity
#[async_trait]
pub trait ThermalSignalSource: Send + Sync {
    async fn current_state(&self) -> Result<ThermalState>;
}

/// Reads a millidegree thermal zone file and buckets it into a severity
#[derive(Debug, Clone)]
pub struct SysfsThermalSource {
    path: PathBuf,
}

impl SysfsThermalSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map a temperature in degrees Celsius to a severity
    pub fn classify(celsius: f64) -> ThermalState {
        if celsius >= CRITICAL_THRESHOLD_C {
            ThermalState::Critical
        } else if celsius >= SERIOUS_THRESHOLD_C {
            ThermalState::Serious
        } else if celsius >= FAIR_THRESHOLD_C {
            ThermalState::Fair
        } else {
            ThermalState::Nominal
        }
    }

    async fn read_celsius(&self) -> Result<f64> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CoordinatorError::ThermalSource(format!("{}: {}", self.path.display(), e))
        })?;
        let millidegrees: i64 = content.trim().parse().map_err(|_| {
            CoordinatorError::ThermalSource(format!(
                "{}: expected integer millidegrees, got '{}'",
                self.path.display(),
                content.trim()
            ))
        })?;
        Ok(millidegrees as f64 / 1000.0)
    }
}

impl Default for SysfsThermalSource {
    fn default() -> Self {
        Self::new(DEFAULT_THERMAL_ZONE)
    }
}

#[async_trait]
impl ThermalSignalSource for SysfsThermalSource {
    async fn current_state(&self) -> Result<ThermalState> {
        let celsius = self.read_celsius().await?;
        Ok(Self::classify(celsius))
    }
}

/// Source whose state is set programmatically
#[derive(Debug, Default)]
pub struct StaticThermalSource {
    state: AtomicU8,
}

impl StaticThermalSource {
    pub fn new(state: ThermalState) -> Self {
        Self {
            state: AtomicU8::new(state.severity()),
        }
    }

    pub fn set(&self, state: ThermalState) {
        self.state.store(state.severity(), Ordering::SeqCst);
    }

    pub fn get(&self) -> ThermalState {
        let severity = self.state.load(Ordering::SeqCst) as usize;
        ThermalState::ALL[severity.min(ThermalState::ALL.len() - 1)]
    }
}

#[async_trait]
impl ThermalSignalSource for StaticThermalSource {
    async fn current_state(&self) -> Result<ThermalState> {
        Ok(self.get())
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Consecutive read failures before the monitor reports unhealthy
    pub failure_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            failure_threshold: 5,
        }
    }
}

/// Periodic poller driving the adapter
pub struct ThermalMonitor {
    source: Arc<dyn ThermalSignalSource>,
    adapter: Arc<ThermalAdapter>,
    config: MonitorConfig,
    health: Option<HealthRegistry>,
    consecutive_failures: u32,
}

impl ThermalMonitor {
    pub fn new(
        source: Arc<dyn ThermalSignalSource>,
        adapter: Arc<ThermalAdapter>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            source,
            adapter,
            config,
            health: None,
            consecutive_failures: 0,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Starting thermal monitor"
        );
        if let Some(health) = &self.health {
            health.register(components::THERMAL_MONITOR).await;
        }

        let mut ticker = interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        debug!(error = %e, "Thermal poll failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down thermal monitor");
                    break;
                }
            }
        }
    }

    /// Read the source once and forward the state to the adapter
    pub async fn poll_once(&mut self) -> Result<Option<TransitionReport>> {
        match self.source.current_state().await {
            Ok(state) => {
                if self.consecutive_failures > 0 {
                    info!(
                        failures = self.consecutive_failures,
                        "Thermal source recovered"
                    );
                }
                self.consecutive_failures = 0;
                if let Some(health) = &self.health {
                    if state >= ThermalState::Serious {
                        health
                            .set_degraded(
                                components::THERMAL_MONITOR,
                                format!("device thermal state is {state}"),
                            )
                            .await;
                    } else {
                        health.set_healthy(components::THERMAL_MONITOR).await;
                    }
                }
                Ok(self.adapter.observe(state))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    error = %e,
                    failures = self.consecutive_failures,
                    "Failed to read thermal source"
                );
                if let Some(health) = &self.health {
                    let message = format!("thermal source unreadable: {e}");
                    if self.consecutive_failures >= self.config.failure_threshold {
                        health
                            .set_unhealthy(components::THERMAL_MONITOR, message)
                            .await;
                    } else {
                        health
                            .set_degraded(components::THERMAL_MONITOR, message)
                            .await;
                    }
                }
                Err(e)
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

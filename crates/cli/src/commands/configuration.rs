//! Offline configuration commands: validate, fallback and estimate

use anyhow::{Context, Result};
use colored::Colorize;
use coordinator_lib::{
    capability::DeviceCapabilities,
    estimate::estimate,
    models::{CaptureConfiguration, ResourceVector, StreamProfile},
    validator::{fallback_configuration, validate},
};
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_priority, format_bytes, format_mbps, print_error, print_info, print_json, print_rows,
    print_success, print_warning, OutputFormat,
};

/// Row for the streams table
#[derive(Tabled)]
struct StreamRow {
    #[tabled(rename = "Stream")]
    stream_id: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Features")]
    features: String,
}

/// Row for the estimate table
#[derive(Tabled)]
struct EstimateRow {
    #[tabled(rename = "Stream")]
    stream_id: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Bandwidth")]
    bandwidth: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "GPU")]
    gpu: String,
    #[tabled(rename = "Power")]
    power: String,
}

impl EstimateRow {
    fn new(stream_id: String, mode: String, v: &ResourceVector) -> Self {
        Self {
            stream_id,
            mode,
            bandwidth: format_mbps(v.bandwidth_mbps),
            memory: format_bytes(v.memory_bytes),
            cpu: format!("{:.1}%", v.cpu_percent),
            gpu: format!("{:.1}%", v.gpu_percent),
            power: format!("{:.0} mW", v.power_mw),
        }
    }
}

/// Read a capture configuration from a JSON file
pub fn load_configuration(path: &Path) -> Result<CaptureConfiguration> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse configuration")
}

fn mode(profile: &StreamProfile) -> String {
    format!("{}@{}", profile.resolution, profile.frame_rate)
}

fn stream_rows(config: &CaptureConfiguration) -> Vec<StreamRow> {
    config
        .streams
        .iter()
        .map(|s| StreamRow {
            stream_id: s.stream_id.clone(),
            priority: color_priority(s.priority),
            mode: mode(s),
            features: s
                .features
                .enabled()
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect()
}

/// Validate a configuration; fails when it has hard errors
pub fn validate_configuration(
    path: &Path,
    caps: &DeviceCapabilities,
    format: OutputFormat,
) -> Result<()> {
    let config = load_configuration(path)?;
    let report = validate(&config, caps);

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("{}", "Configuration Validation".bold());
            println!("{}", "=".repeat(50));
            print_rows(stream_rows(&config));
            println!();

            for error in &report.errors {
                print_error(&error.to_string());
            }
            for warning in &report.warnings {
                print_warning(&warning.to_string());
            }
            if report.is_valid() {
                print_success("Configuration is supported");
            }
        }
    }

    if !report.is_valid() {
        anyhow::bail!(
            "configuration has {} error(s); try `capctl fallback`",
            report.errors.len()
        );
    }
    Ok(())
}

/// Print the closest supported configuration
pub fn show_fallback(path: &Path, caps: &DeviceCapabilities, format: OutputFormat) -> Result<()> {
    let config = load_configuration(path)?;
    let fallback = fallback_configuration(&config, caps);

    match format {
        OutputFormat::Json => print_json(&fallback)?,
        OutputFormat::Table => {
            println!("{}", "Fallback Configuration".bold());
            println!("{}", "=".repeat(50));
            if fallback == config {
                print_info("Configuration is already supported");
            }
            print_rows(stream_rows(&fallback));

            let dropped: Vec<&str> = config
                .streams
                .iter()
                .filter(|s| !fallback.streams.iter().any(|f| f.stream_id == s.stream_id))
                .map(|s| s.stream_id.as_str())
                .collect();
            if !dropped.is_empty() {
                print_warning(&format!("Dropped streams: {}", dropped.join(", ")));
            }
        }
    }

    Ok(())
}

/// Print per-stream resource estimates and the total
pub fn show_estimate(path: &Path, format: OutputFormat) -> Result<()> {
    let config = load_configuration(path)?;
    let estimates: Vec<(&StreamProfile, ResourceVector)> =
        config.streams.iter().map(|s| (s, estimate(s))).collect();
    let total: ResourceVector = estimates.iter().map(|(_, v)| *v).sum();

    match format {
        OutputFormat::Json => {
            let streams: Vec<serde_json::Value> = estimates
                .iter()
                .map(|(s, v)| serde_json::json!({ "stream_id": s.stream_id, "resources": v }))
                .collect();
            print_json(&serde_json::json!({ "streams": streams, "total": total }))?;
        }
        OutputFormat::Table => {
            let mut rows: Vec<EstimateRow> = estimates
                .iter()
                .map(|(s, v)| EstimateRow::new(s.stream_id.clone(), mode(s), v))
                .collect();
            if !rows.is_empty() {
                rows.push(EstimateRow::new("total".to_string(), String::new(), &total));
            }
            print_rows(rows);
        }
    }

    Ok(())
}

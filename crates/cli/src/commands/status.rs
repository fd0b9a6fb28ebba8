//! Status of a running coordinator

use anyhow::Result;
use colored::Colorize;
use coordinator_lib::models::ResourceDimension;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::commands::thermal::mitigation_rows;
use crate::output::{
    color_priority, color_thermal, color_usage, format_bytes, format_mbps, format_ratio,
    print_json, print_rows, OutputFormat,
};

/// Row for the budget table
#[derive(Tabled)]
struct BudgetRow {
    #[tabled(rename = "Resource")]
    dimension: String,
    #[tabled(rename = "Used")]
    used: String,
    #[tabled(rename = "Budget")]
    budget: String,
    #[tabled(rename = "Usage")]
    usage: String,
}

/// Row for the allocation table
#[derive(Tabled)]
struct AllocationRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Stream")]
    stream_id: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Bandwidth")]
    bandwidth: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

fn format_dimension(dimension: ResourceDimension, value: f64) -> String {
    match dimension {
        ResourceDimension::Bandwidth => format_mbps(value),
        ResourceDimension::Memory => format_bytes(value as u64),
        ResourceDimension::Cpu | ResourceDimension::Gpu => format!("{value:.1}%"),
        ResourceDimension::Power => format!("{value:.0} mW"),
    }
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Show thermal state, budget usage, allocations and synchronization
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    if let OutputFormat::Json = format {
        return print_json(&status);
    }

    println!("{}", "Coordinator Status".bold());
    println!("{}", "=".repeat(50));
    println!("Thermal State:   {}", color_thermal(status.thermal_state));
    println!("Headroom:        {}", format_ratio(status.thermal_headroom));
    println!("Predicted:       {}", color_thermal(status.predicted_state));
    println!(
        "Power Saving:    {}",
        if status.power_saving {
            "on".yellow().to_string()
        } else {
            "off".to_string()
        }
    );
    println!();

    println!("{}", "Budget".bold());
    println!("{}", "-".repeat(50));
    print_rows(
        ResourceDimension::ALL
            .iter()
            .map(|d| {
                let used = status.usage.get(*d);
                let budget = status.scaled_budget.get(*d);
                BudgetRow {
                    dimension: d.to_string(),
                    used: format_dimension(*d, used),
                    budget: format_dimension(*d, budget),
                    usage: color_usage(used, budget),
                }
            })
            .collect(),
    );
    println!();

    println!("{}", "Allocations".bold());
    println!("{}", "-".repeat(50));
    print_rows(
        status
            .allocations
            .iter()
            .map(|a| AllocationRow {
                id: a.id.0,
                stream_id: a.profile.stream_id.clone(),
                priority: color_priority(a.profile.priority),
                mode: format!("{}@{}", a.profile.resolution, a.profile.frame_rate),
                bandwidth: format_mbps(a.resources.bandwidth_mbps),
                updated: format_timestamp(a.updated_at),
            })
            .collect(),
    );

    if !status.active_mitigations.is_empty() {
        println!();
        println!("{}", "Active Mitigations".bold());
        println!("{}", "-".repeat(50));
        print_rows(mitigation_rows(&status.active_mitigations));
    }

    let sync = &status.synchronization;
    println!();
    println!("{}", "Synchronization".bold());
    println!("{}", "-".repeat(50));
    println!("Mode:            {}", sync.mode);
    println!("Tolerance:       {} ms", sync.tolerance_ms);
    println!("Streams:         {}", sync.streams.len());
    println!("Sets Emitted:    {}", sync.synchronized_sets);
    println!("Corrections:     {}", sync.total_corrections());
    println!("Dropped Frames:  {}", sync.total_dropped());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_dimension() {
        assert_eq!(format_dimension(ResourceDimension::Cpu, 12.345), "12.3%");
        assert_eq!(format_dimension(ResourceDimension::Power, 150.0), "150 mW");
        assert_eq!(format_dimension(ResourceDimension::Memory, 2048.0), "2.00Ki");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }
}

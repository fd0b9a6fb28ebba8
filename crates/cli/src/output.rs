//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use coordinator_lib::{models::Priority, thermal::ThermalState};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_rows<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

pub fn format_mbps(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Format a fraction as percentage
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

/// Color a thermal state by severity
pub fn color_thermal(state: ThermalState) -> String {
    let label = state.to_string();
    match state {
        ThermalState::Nominal => label.green().to_string(),
        ThermalState::Fair => label.yellow().to_string(),
        ThermalState::Serious => label.red().to_string(),
        ThermalState::Critical => label.red().bold().to_string(),
    }
}

pub fn color_priority(priority: Priority) -> String {
    let label = priority.to_string();
    match priority {
        Priority::Essential => label.cyan().bold().to_string(),
        Priority::High => label.cyan().to_string(),
        Priority::Medium => label,
        Priority::Low => label.dimmed().to_string(),
    }
}

/// Color usage against a budget
pub fn color_usage(used: f64, budget: f64) -> String {
    let ratio = if budget > 0.0 { used / budget } else { 1.0 };
    let formatted = format_ratio(ratio);
    if ratio >= 1.0 {
        formatted.red().to_string()
    } else if ratio >= 0.8 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00Ki");
        assert_eq!(format_bytes(18_662_400), "17.80Mi");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00Gi");
    }

    #[test]
    fn test_format_mbps() {
        assert_eq!(format_mbps(746.496), "746.5 Mbps");
        assert_eq!(format_mbps(2985.984), "2.99 Gbps");
    }

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(0.7), "70%");
        assert_eq!(format_ratio(1.0), "100%");
    }
}

//! Thermal commands

use anyhow::Result;
use colored::Colorize;
use coordinator_lib::thermal::{state_to_plan, Mitigation, MitigationAction, MitigationPolicy, ThermalState};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_thermal, format_ratio, print_info, print_json, print_rows, print_success, OutputFormat,
};

/// Row for the mitigation table
#[derive(Tabled)]
pub(crate) struct MitigationRow {
    #[tabled(rename = "#")]
    order: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Scope")]
    scope: String,
}

pub(crate) fn mitigation_rows(mitigations: &[Mitigation]) -> Vec<MitigationRow> {
    mitigations
        .iter()
        .enumerate()
        .map(|(i, m)| MitigationRow {
            order: i + 1,
            action: m.kind().to_string(),
            target: match &m.action {
                MitigationAction::ReduceFrameRate { target_fps } => format!("{target_fps} fps"),
                MitigationAction::ReduceResolution { factor } => format_ratio(*factor),
                MitigationAction::DisableFeatures { features } => features
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                MitigationAction::DisableStreams | MitigationAction::EnablePowerSaving => {
                    String::new()
                }
            },
            scope: match m.priority_threshold {
                Some(threshold) => format!("below {threshold}"),
                None => "all streams".to_string(),
            },
        })
        .collect()
}

/// Print the mitigation plan for a state under the default policy
pub fn show_plan(state: ThermalState, format: OutputFormat) -> Result<()> {
    let plan = state_to_plan(state, &MitigationPolicy::default());

    match format {
        OutputFormat::Json => print_json(&plan)?,
        OutputFormat::Table => {
            println!("{}", "Mitigation Plan".bold());
            println!("{}", "=".repeat(50));
            println!("State:     {}", color_thermal(state));
            println!("Headroom:  {}", format_ratio(state.headroom()));
            println!();
            if plan.is_empty() {
                print_info("No mitigations at this state");
            } else {
                print_rows(mitigation_rows(&plan.mitigations));
            }
        }
    }

    Ok(())
}

/// Inject a thermal state into a running coordinator
pub async fn signal(client: &ApiClient, state: ThermalState, format: OutputFormat) -> Result<()> {
    let response = client.signal_thermal(state).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            if response.transitioned {
                print_success(&format!(
                    "Coordinator moved to {}",
                    color_thermal(response.status.thermal_state)
                ));
                print_rows(mitigation_rows(&response.status.active_mitigations));
            } else {
                print_info(&format!("Coordinator already at {}", color_thermal(state)));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_rows() {
        let plan = state_to_plan(ThermalState::Critical, &MitigationPolicy::default());
        let rows = mitigation_rows(&plan.mitigations);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].action, "disable_streams");
        assert_eq!(rows[0].scope, "below essential");
        assert_eq!(rows[1].target, "10 fps");
        assert_eq!(rows[2].scope, "all streams");
    }
}

//! iOS simulator support via `xcrun simctl`
//!
//! Only simulators can be cloned, so physical devices are not listed.

pub mod simctl;
pub mod simulator;

pub use simulator::IosSimulatorManager;

use crate::utils::env::EnvMap;
use anyhow::Result;
use colored::Colorize;
use simctl::Simctl;

/// List simulators known to simctl
pub async fn list_devices(env: &EnvMap) -> Result<()> {
    let simulators = Simctl::resolve(env)?.all().await?;

    if simulators.is_empty() {
        println!("  No iOS simulators found");
    } else {
        println!("  Found {} simulator(s):", simulators.len());
        for sim in simulators {
            let state = if sim.is_booted() {
                sim.state.green()
            } else {
                sim.state.dimmed()
            };
            println!(
                "    {} {} {} ({})",
                "•".green(),
                sim.name.white().bold(),
                sim.udid.dimmed(),
                state
            );
        }
    }

    Ok(())
}

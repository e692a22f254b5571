pub mod adb;
pub mod avd;
pub mod emulator;

pub use emulator::AndroidEmulatorManager;

use crate::utils::{binary_resolver, env::EnvMap};
use adb::Adb;
use anyhow::Result;
use colored::Colorize;

/// List devices attached to adb
pub async fn list_devices(env: &EnvMap) -> Result<()> {
    let adb = Adb::resolve(&binary_resolver::with_android_sdk(env))?;
    let devices = adb.devices().await?;

    if devices.is_empty() {
        println!("  No Android devices connected");
    } else {
        println!("  Found {} device(s):", devices.len());
        for device in devices {
            let kind = if device.is_emulator() { "emulator" } else { "device" };
            println!(
                "    {} {} ({}, {})",
                "•".green(),
                device.serial.white().bold(),
                device.state.dimmed(),
                kind.dimmed()
            );
        }
    }

    Ok(())
}

use crate::driver::common::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runner configuration
///
/// Every bounded wait in the runner is driven by one of the policies below.
/// A YAML file may override any subset of the fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Prefix for ephemeral device names (`<prefix>-<flow>-<attempt>`)
    pub device_name_prefix: String,

    /// Explicit path to the maestro binary
    pub maestro_binary: Option<PathBuf>,

    /// Scratch directory for logs and recordings before they are moved
    pub scratch_dir: Option<PathBuf>,

    /// iOS: no-op device command succeeding
    pub ios_boot: RetryPolicy,

    /// iOS: data migration process gone
    pub ios_data_migration: RetryPolicy,

    /// iOS: "Recording started" marker seen
    pub ios_recording_started: RetryPolicy,

    /// Android: sys.boot_completed == 1
    pub android_boot: RetryPolicy,

    /// Android: emulator serial attached to adb
    pub android_attach: RetryPolicy,

    /// Android: /sdcard writable
    pub android_storage_ready: RetryPolicy,

    /// Android: recording file no longer held open
    pub android_recording_released: RetryPolicy,

    /// Both platforms: recorder process exited after interrupt
    pub recording_stop: RetryPolicy,

    /// Both platforms: device gone after shutdown/kill
    pub device_shutdown: RetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            device_name_prefix: "maestro-device".to_string(),
            maestro_binary: None,
            scratch_dir: None,
            ios_boot: RetryPolicy::every_second(30 * 60),
            ios_data_migration: RetryPolicy::every_second(30 * 60),
            ios_recording_started: RetryPolicy::every_second(10),
            android_boot: RetryPolicy::every_second(3 * 60),
            android_attach: RetryPolicy::every_second(2 * 60),
            android_storage_ready: RetryPolicy::every_second(60),
            android_recording_released: RetryPolicy::every_second(30),
            recording_stop: RetryPolicy::every_second(10),
            device_shutdown: RetryPolicy::every_second(60),
        }
    }
}

impl RunnerConfig {
    /// Load from a YAML file; absent keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Scratch directory, defaulting to `<output>/.scratch`
    pub fn scratch_dir_for(&self, output_dir: &Path) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| output_dir.join(".scratch"))
    }
}

use super::Platform;
use crate::error::RunnerError;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Child;

/// The single pre-booted device of a job that ephemeral devices clone from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDevice {
    pub platform: Platform,
    /// Simulator UDID (iOS) or AVD name (Android)
    pub identifier: String,
    /// adb serial of the running emulator (Android only)
    pub serial: Option<String>,
}

/// An ephemeral device owned by exactly one attempt
#[derive(Debug)]
pub struct DeviceHandle {
    pub platform: Platform,
    /// Name given at clone time (`<prefix>-<flow>-<attempt>`)
    pub name: String,
    pub source_identifier: String,
    /// Simulator UDID (iOS) or AVD name (Android) of the clone
    pub ephemeral_identifier: String,
    /// Set once the device has been started
    pub booted_serial_or_udid: Option<String>,
    /// Detached emulator process, kept so it can be killed on delete
    pub(crate) process: Option<Child>,
}

impl DeviceHandle {
    pub fn new(
        platform: Platform,
        name: impl Into<String>,
        source_identifier: impl Into<String>,
        ephemeral_identifier: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            name: name.into(),
            source_identifier: source_identifier.into(),
            ephemeral_identifier: ephemeral_identifier.into(),
            booted_serial_or_udid: None,
            process: None,
        }
    }

    /// Identifier to address the running device with
    pub fn booted_id(&self) -> Result<&str> {
        self.booted_serial_or_udid
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Device {} has not been started", self.name))
    }
}

/// A screen recording in progress
#[derive(Debug)]
pub struct RecordingHandle {
    pub(crate) process: Option<Child>,
    /// Where the finished recording ends up on this machine
    pub local_path: PathBuf,
    /// Path on the device, for recorders that write there (Android)
    pub remote_path: Option<String>,
}

/// Device lifecycle capability, implemented once per platform
///
/// Implementations shell out to the platform tooling; none of them keep
/// state between calls beyond what the handles carry.
#[async_trait]
pub trait DeviceLifecycle: Send + Sync {
    fn platform(&self) -> Platform;

    /// Locate the one booted source device. Zero or several is fatal.
    async fn find_source_device(&self) -> Result<SourceDevice, RunnerError>;

    /// Put the source device into a state it can be cloned from
    async fn prepare_source(&self, source: &SourceDevice) -> Result<()>;

    /// Clone `source` into a new device called `name`
    async fn clone_device(&self, source: &SourceDevice, name: &str) -> Result<DeviceHandle>;

    /// Boot a cloned device, filling in `booted_serial_or_udid`
    async fn start(&self, handle: &mut DeviceHandle) -> Result<()>;

    /// Block until the device accepts work
    async fn wait_for_ready(&self, handle: &DeviceHandle) -> Result<()>;

    /// Dump the device logs into `dest_dir`, returning the written path
    async fn collect_logs(&self, handle: &DeviceHandle, dest_dir: &Path) -> Result<PathBuf>;

    /// Stop and remove the device. Safe to call on a device never started.
    async fn delete(&self, handle: &mut DeviceHandle) -> Result<()>;

    async fn start_screen_recording(
        &self,
        handle: &DeviceHandle,
        dest_dir: &Path,
    ) -> Result<RecordingHandle>;

    /// Stop the recording and return the local path of the video
    async fn stop_screen_recording(
        &self,
        handle: &DeviceHandle,
        recording: RecordingHandle,
    ) -> Result<PathBuf>;
}

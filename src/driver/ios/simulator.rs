use super::simctl::Simctl;
use crate::driver::common::{send_interrupt, Cancellation};
use crate::driver::traits::{DeviceHandle, DeviceLifecycle, RecordingHandle, SourceDevice};
use crate::driver::Platform;
use crate::error::RunnerError;
use crate::utils::{config::RunnerConfig, env::EnvMap};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

const RECORDING_STARTED_MARKER: &str = "Recording started";
const DATA_MIGRATOR: &str = "com.apple.datamigrator";

/// iOS simulator lifecycle built on `xcrun simctl`
pub struct IosSimulatorManager {
    simctl: Simctl,
    config: RunnerConfig,
    cancel: Cancellation,
}

impl IosSimulatorManager {
    pub fn new(config: &RunnerConfig, env: &EnvMap, cancel: Cancellation) -> Result<Self> {
        Ok(Self {
            simctl: Simctl::resolve(env)?,
            config: config.clone(),
            cancel,
        })
    }

    async fn is_booted(&self, udid: &str) -> Result<bool> {
        Ok(self.simctl.booted().await?.iter().any(|s| s.udid == udid))
    }
}

/// Drain a recorder output stream, raising `seen` once the start marker shows up
fn watch_for_marker<R>(stream: R, seen: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("recordVideo: {}", line);
            if line.contains(RECORDING_STARTED_MARKER) {
                seen.store(true, Ordering::SeqCst);
            }
        }
    });
}

#[async_trait]
impl DeviceLifecycle for IosSimulatorManager {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn find_source_device(&self) -> Result<SourceDevice, RunnerError> {
        let booted = self.simctl.booted().await.map_err(|e| {
            RunnerError::Precondition(format!("Failed to list simulators: {:#}", e))
        })?;

        match booted.as_slice() {
            [only] => Ok(SourceDevice {
                platform: Platform::Ios,
                identifier: only.udid.clone(),
                serial: None,
            }),
            [] => Err(RunnerError::Precondition(
                "No booted iOS simulator found".to_string(),
            )),
            many => Err(RunnerError::Precondition(format!(
                "Expected exactly one booted iOS simulator, found {}: {}",
                many.len(),
                many.iter()
                    .map(|s| format!("{} ({})", s.name, s.udid))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    async fn prepare_source(&self, source: &SourceDevice) -> Result<()> {
        let udid = source.identifier.as_str();
        log::info!("Shutting down source simulator {}", udid);
        self.simctl.shutdown(udid).await?;
        self.config
            .device_shutdown
            .wait_until(&self.cancel, &format!("{} to shut down", udid), || async move {
                Ok::<_, anyhow::Error>(!self.is_booted(udid).await?)
            })
            .await?;
        Ok(())
    }

    async fn clone_device(&self, source: &SourceDevice, name: &str) -> Result<DeviceHandle> {
        let udid = self.simctl.clone_device(&source.identifier, name).await?;
        Ok(DeviceHandle::new(
            Platform::Ios,
            name,
            source.identifier.clone(),
            udid,
        ))
    }

    async fn start(&self, handle: &mut DeviceHandle) -> Result<()> {
        self.simctl.boot(&handle.ephemeral_identifier).await?;
        handle.booted_serial_or_udid = Some(handle.ephemeral_identifier.clone());
        Ok(())
    }

    async fn wait_for_ready(&self, handle: &DeviceHandle) -> Result<()> {
        let udid = handle.booted_id()?;

        self.config
            .ios_boot
            .wait_until(&self.cancel, &format!("{} to accept commands", udid), || async move {
                let out = self
                    .simctl
                    .run_raw(&["io", udid, "screenshot", "/dev/null"])
                    .await?;
                Ok::<_, anyhow::Error>(out.success)
            })
            .await?;

        // First boot of a clone runs a data migration that blocks app installs
        self.config
            .ios_data_migration
            .wait_until(&self.cancel, "data migration to finish", || async move {
                let services = self
                    .simctl
                    .spawn_in(udid, &["launchctl", "print", "system"])
                    .await?;
                Ok::<_, anyhow::Error>(!services.contains(DATA_MIGRATOR))
            })
            .await?;

        Ok(())
    }

    async fn collect_logs(&self, handle: &DeviceHandle, dest_dir: &Path) -> Result<PathBuf> {
        let udid = handle.booted_id()?;
        std::fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(format!("{}.logarchive", handle.name));
        self.simctl.collect_logs(udid, &dest).await?;
        Ok(dest)
    }

    async fn delete(&self, handle: &mut DeviceHandle) -> Result<()> {
        let udid = handle.ephemeral_identifier.as_str();
        if let Err(e) = self.simctl.shutdown(udid).await {
            log::warn!("{:#}", e);
        }
        self.simctl.delete(udid).await
    }

    async fn start_screen_recording(
        &self,
        handle: &DeviceHandle,
        dest_dir: &Path,
    ) -> Result<RecordingHandle> {
        let udid = handle.booted_id()?;
        std::fs::create_dir_all(dest_dir)?;
        let local_path = dest_dir.join(format!("{}.mp4", handle.name));

        let mut child = self.simctl.record_video(udid, &local_path)?;
        let started = Arc::new(AtomicBool::new(false));
        if let Some(stdout) = child.stdout.take() {
            watch_for_marker(stdout, started.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            watch_for_marker(stderr, started.clone());
        }

        let started_ref = &started;
        let wait = self
            .config
            .ios_recording_started
            .wait_until(&self.cancel, "recording to start", || async move {
                Ok::<_, anyhow::Error>(started_ref.load(Ordering::SeqCst))
            })
            .await;

        if let Err(e) = wait {
            let _ = child.kill().await;
            return Err(e.into());
        }

        Ok(RecordingHandle {
            process: Some(child),
            local_path,
            remote_path: None,
        })
    }

    async fn stop_screen_recording(
        &self,
        _handle: &DeviceHandle,
        mut recording: RecordingHandle,
    ) -> Result<PathBuf> {
        let mut child = recording
            .process
            .take()
            .context("Recording has no recorder process")?;

        // recordVideo only writes a playable file when interrupted
        send_interrupt(&mut child)?;
        match tokio::time::timeout(self.config.recording_stop.budget(), child.wait()).await {
            Ok(status) => {
                let status = status?;
                log::debug!("recordVideo exited with {}", status);
            }
            Err(_) => {
                log::warn!("recordVideo did not exit, killing");
                let _ = child.kill().await;
            }
        }

        if !recording.local_path.is_file() {
            anyhow::bail!(
                "Recording was not written to {}",
                recording.local_path.display()
            );
        }
        Ok(recording.local_path)
    }
}

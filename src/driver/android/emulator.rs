use super::adb::Adb;
use super::avd;
use crate::driver::common::{send_interrupt, spawn_detached, Cancellation};
use crate::driver::traits::{DeviceHandle, DeviceLifecycle, RecordingHandle, SourceDevice};
use crate::driver::Platform;
use crate::error::RunnerError;
use crate::utils::{binary_resolver, config::RunnerConfig, env::EnvMap};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const FIRST_CONSOLE_PORT: u16 = 5554;
const LAST_CONSOLE_PORT: u16 = 5682;
const STORAGE_PROBE: &str = "/sdcard/.maestro-runner-probe";

/// Android emulator lifecycle built on adb, the emulator binary and AVD files
pub struct AndroidEmulatorManager {
    adb: Adb,
    emulator: PathBuf,
    env: EnvMap,
    avd_home: PathBuf,
    config: RunnerConfig,
    cancel: Cancellation,
}

impl AndroidEmulatorManager {
    pub fn new(config: &RunnerConfig, env: &EnvMap, cancel: Cancellation) -> Result<Self> {
        let env = binary_resolver::with_android_sdk(env);
        Ok(Self {
            adb: Adb::resolve(&env)?,
            emulator: binary_resolver::find_emulator(&env)?,
            avd_home: avd::avd_home(&env)?,
            env,
            config: config.clone(),
            cancel,
        })
    }

    async fn attached_serials(&self) -> Result<HashSet<String>> {
        Ok(self
            .adb
            .devices()
            .await?
            .into_iter()
            .map(|d| d.serial)
            .collect())
    }

    async fn wait_until_detached(&self, serial: &str) -> Result<()> {
        self.config
            .device_shutdown
            .wait_until(&self.cancel, &format!("{} to shut down", serial), || async move {
                Ok::<_, anyhow::Error>(!self.attached_serials().await?.contains(serial))
            })
            .await?;
        Ok(())
    }

    async fn free_console_port(&self) -> Result<u16> {
        let attached = self.attached_serials().await?;
        (FIRST_CONSOLE_PORT..=LAST_CONSOLE_PORT)
            .step_by(2)
            .find(|port| !attached.contains(&format!("emulator-{}", port)))
            .ok_or_else(|| anyhow::anyhow!("No free emulator console port"))
    }
}

#[async_trait]
impl DeviceLifecycle for AndroidEmulatorManager {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn find_source_device(&self) -> Result<SourceDevice, RunnerError> {
        let devices = self
            .adb
            .devices()
            .await
            .map_err(|e| RunnerError::Precondition(format!("Failed to list emulators: {:#}", e)))?;

        let booted: Vec<_> = devices
            .into_iter()
            .filter(|d| d.is_emulator() && d.is_online())
            .collect();

        let serial = match booted.as_slice() {
            [only] => only.serial.clone(),
            [] => {
                return Err(RunnerError::Precondition(
                    "No running Android emulator found".to_string(),
                ))
            }
            many => {
                return Err(RunnerError::Precondition(format!(
                    "Expected exactly one running Android emulator, found {}: {}",
                    many.len(),
                    many.iter()
                        .map(|d| d.serial.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )))
            }
        };

        let avd_name = self.adb.avd_name(&serial).await.map_err(|e| {
            RunnerError::Precondition(format!("Failed to read AVD name of {}: {:#}", serial, e))
        })?;

        Ok(SourceDevice {
            platform: Platform::Android,
            identifier: avd_name,
            serial: Some(serial),
        })
    }

    async fn prepare_source(&self, source: &SourceDevice) -> Result<()> {
        let Some(serial) = source.serial.as_deref() else {
            return Ok(());
        };
        log::info!("Shutting down source emulator {} ({})", serial, source.identifier);
        self.adb.emu_kill(serial).await?;
        self.wait_until_detached(serial).await
    }

    async fn clone_device(&self, source: &SourceDevice, name: &str) -> Result<DeviceHandle> {
        let home = self.avd_home.clone();
        let from = source.identifier.clone();
        let to = name.to_string();
        tokio::task::spawn_blocking(move || avd::clone_avd(&home, &from, &to))
            .await
            .context("AVD clone task panicked")??;

        Ok(DeviceHandle::new(
            Platform::Android,
            name,
            source.identifier.clone(),
            name,
        ))
    }

    async fn start(&self, handle: &mut DeviceHandle) -> Result<()> {
        let port = self.free_console_port().await?;
        let serial = format!("emulator-{}", port);
        let avd = format!("@{}", handle.ephemeral_identifier);
        let port_arg = port.to_string();

        let child = spawn_detached(
            &self.emulator,
            &[
                avd.as_str(),
                "-port",
                port_arg.as_str(),
                "-no-window",
                "-no-audio",
                "-no-boot-anim",
                "-no-snapshot-save",
            ],
            &self.env,
        )?;
        handle.process = Some(child);
        handle.booted_serial_or_udid = Some(serial.clone());

        let serial_ref = serial.as_str();
        self.config
            .android_attach
            .wait_until(&self.cancel, &format!("{} to attach to adb", serial), || async move {
                Ok::<_, anyhow::Error>(self.attached_serials().await?.contains(serial_ref))
            })
            .await?;
        Ok(())
    }

    async fn wait_for_ready(&self, handle: &DeviceHandle) -> Result<()> {
        let serial = handle.booted_id()?;
        self.config
            .android_boot
            .wait_until(&self.cancel, &format!("{} to finish booting", serial), || async move {
                let out = self.adb.shell(serial, "getprop sys.boot_completed").await?;
                Ok::<_, anyhow::Error>(out.trim() == "1")
            })
            .await?;
        Ok(())
    }

    async fn collect_logs(&self, handle: &DeviceHandle, dest_dir: &Path) -> Result<PathBuf> {
        let serial = handle.booted_id()?;
        std::fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(format!("{}.log", handle.name));
        self.adb.logcat_to_file(serial, &dest).await?;
        Ok(dest)
    }

    async fn delete(&self, handle: &mut DeviceHandle) -> Result<()> {
        if let Some(serial) = handle.booted_serial_or_udid.clone() {
            if let Err(e) = self.adb.emu_kill(&serial).await {
                log::debug!("emu kill {} failed: {:#}", serial, e);
            }
            if let Err(e) = self.wait_until_detached(&serial).await {
                log::warn!("{:#}", e);
            }
        }

        if let Some(mut child) = handle.process.take() {
            if matches!(child.try_wait(), Ok(None)) {
                log::debug!("Emulator process for {} still alive, killing", handle.name);
                let _ = child.kill().await;
            }
        }

        let home = self.avd_home.clone();
        let name = handle.ephemeral_identifier.clone();
        tokio::task::spawn_blocking(move || avd::delete_avd(&home, &name))
            .await
            .context("AVD delete task panicked")?
    }

    async fn start_screen_recording(
        &self,
        handle: &DeviceHandle,
        dest_dir: &Path,
    ) -> Result<RecordingHandle> {
        let serial = handle.booted_id()?;

        self.config
            .android_storage_ready
            .wait_until(&self.cancel, "device storage to be writable", || async move {
                let probe = format!("touch {0} && rm {0}", STORAGE_PROBE);
                Ok::<_, anyhow::Error>(self.adb.shell_raw(serial, &probe).await?.success)
            })
            .await?;

        std::fs::create_dir_all(dest_dir)?;
        let remote = format!("/sdcard/{}.mp4", handle.name);
        let child = self.adb.spawn(serial, &["shell", "screenrecord", &remote])?;

        Ok(RecordingHandle {
            process: Some(child),
            local_path: dest_dir.join(format!("{}.mp4", handle.name)),
            remote_path: Some(remote),
        })
    }

    async fn stop_screen_recording(
        &self,
        handle: &DeviceHandle,
        mut recording: RecordingHandle,
    ) -> Result<PathBuf> {
        let serial = handle.booted_id()?;
        let remote = recording
            .remote_path
            .clone()
            .context("Android recording has no device path")?;

        // SIGINT lets screenrecord finalize the MP4
        let _ = self.adb.shell_raw(serial, "pkill -INT screenrecord").await;

        if let Some(mut child) = recording.process.take() {
            let _ = send_interrupt(&mut child);
            if tokio::time::timeout(self.config.recording_stop.budget(), child.wait())
                .await
                .is_err()
            {
                log::warn!("screenrecord did not exit, killing");
                let _ = child.kill().await;
            }
        }

        let remote_ref = remote.as_str();
        self.config
            .android_recording_released
            .wait_until(&self.cancel, "recording file to be released", || async move {
                let out = self
                    .adb
                    .shell_raw(serial, &format!("lsof {}", remote_ref))
                    .await?;
                Ok::<_, anyhow::Error>(!out.stdout.contains(remote_ref))
            })
            .await?;

        self.adb.pull(serial, &remote, &recording.local_path).await?;
        if let Err(e) = self.adb.shell(serial, &format!("rm -f {}", remote)).await {
            log::debug!("Failed to remove {} from device: {:#}", remote, e);
        }

        Ok(recording.local_path)
    }
}

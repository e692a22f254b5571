//! Clean-device orchestration: clone, boot, run, and always tear down

use crate::driver::traits::{DeviceHandle, DeviceLifecycle, SourceDevice};
use crate::error::RunnerError;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Work to run on a ready ephemeral device
#[async_trait]
pub trait DeviceTask: Send + Sync {
    type Output: Send;

    async fn run(&self, device: &DeviceHandle) -> Result<Self::Output>;
}

/// What happened to the device logs of one attempt
#[derive(Debug)]
pub enum LogsOutcome {
    Collected(PathBuf),
    Failed(anyhow::Error),
    /// The device never booted, so there was nothing to collect
    Absent,
}

impl LogsOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            LogsOutcome::Collected(path) => Some(path),
            _ => None,
        }
    }
}

/// Task result and logs result, reported independently
#[derive(Debug)]
pub struct CleanDeviceOutcome<T> {
    pub result: Result<T>,
    pub logs: LogsOutcome,
}

/// Clone `source` into `name`, boot it, run `task`, then collect logs into
/// `logs_dir` and delete the device no matter how the task ended.
///
/// Clone, boot and readiness failures surface as a `DeviceLifecycle` error in
/// `result`. Log collection and deletion failures are logged only.
pub async fn with_clean_device<T>(
    manager: &dyn DeviceLifecycle,
    source: &SourceDevice,
    name: &str,
    logs_dir: &Path,
    task: &T,
) -> CleanDeviceOutcome<T::Output>
where
    T: DeviceTask + ?Sized,
{
    let mut handle = match manager.clone_device(source, name).await {
        Ok(handle) => handle,
        Err(e) => {
            return CleanDeviceOutcome {
                result: Err(RunnerError::device(name, format!("clone failed: {:#}", e)).into()),
                logs: LogsOutcome::Absent,
            }
        }
    };
    log::info!("Cloned {} into {}", source.identifier, handle.ephemeral_identifier);

    let result = match boot(manager, &mut handle).await {
        Ok(()) => task.run(&handle).await,
        Err(e) => Err(e.into()),
    };

    let logs = if handle.booted_serial_or_udid.is_some() {
        match manager.collect_logs(&handle, logs_dir).await {
            Ok(path) => LogsOutcome::Collected(path),
            Err(e) => {
                log::warn!("Failed to collect logs from {}: {:#}", name, e);
                LogsOutcome::Failed(e)
            }
        }
    } else {
        LogsOutcome::Absent
    };

    if let Err(e) = manager.delete(&mut handle).await {
        log::warn!("Failed to delete device {}: {:#}", name, e);
    }

    CleanDeviceOutcome { result, logs }
}

async fn boot(manager: &dyn DeviceLifecycle, handle: &mut DeviceHandle) -> Result<(), RunnerError> {
    manager
        .start(handle)
        .await
        .map_err(|e| RunnerError::device(&handle.name, format!("start failed: {:#}", e)))?;
    manager
        .wait_for_ready(handle)
        .await
        .map_err(|e| RunnerError::device(&handle.name, format!("not ready: {:#}", e)))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod fakes {
    use crate::driver::traits::{DeviceHandle, DeviceLifecycle, RecordingHandle, SourceDevice};
    use crate::driver::Platform;
    use crate::error::RunnerError;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Scriptable in-memory device manager that records every call
    #[derive(Default)]
    pub struct FakeDevices {
        pub calls: Mutex<Vec<String>>,
        pub source_count: usize,
        pub fail_clone: bool,
        pub fail_start: bool,
        pub fail_ready: bool,
        pub fail_logs: bool,
        pub fail_delete: bool,
        pub fail_record_start: bool,
        pub fail_record_stop: bool,
    }

    impl FakeDevices {
        pub fn new() -> Self {
            Self {
                source_count: 1,
                ..Default::default()
            }
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceLifecycle for FakeDevices {
        fn platform(&self) -> Platform {
            Platform::Android
        }

        async fn find_source_device(&self) -> Result<SourceDevice, RunnerError> {
            self.push("find_source".to_string());
            if self.source_count != 1 {
                return Err(RunnerError::Precondition(format!(
                    "found {} booted devices",
                    self.source_count
                )));
            }
            Ok(SourceDevice {
                platform: Platform::Android,
                identifier: "Pixel_7".to_string(),
                serial: Some("emulator-5554".to_string()),
            })
        }

        async fn prepare_source(&self, _source: &SourceDevice) -> Result<()> {
            self.push("prepare_source".to_string());
            Ok(())
        }

        async fn clone_device(&self, source: &SourceDevice, name: &str) -> Result<DeviceHandle> {
            self.push(format!("clone {}", name));
            if self.fail_clone {
                anyhow::bail!("disk full");
            }
            Ok(DeviceHandle::new(
                Platform::Android,
                name,
                source.identifier.clone(),
                name,
            ))
        }

        async fn start(&self, handle: &mut DeviceHandle) -> Result<()> {
            self.push(format!("start {}", handle.name));
            if self.fail_start {
                anyhow::bail!("emulator crashed");
            }
            handle.booted_serial_or_udid = Some("emulator-5556".to_string());
            Ok(())
        }

        async fn wait_for_ready(&self, handle: &DeviceHandle) -> Result<()> {
            self.push(format!("ready {}", handle.name));
            if self.fail_ready {
                anyhow::bail!("boot timed out");
            }
            Ok(())
        }

        async fn collect_logs(&self, handle: &DeviceHandle, dest_dir: &Path) -> Result<PathBuf> {
            self.push(format!("logs {}", handle.name));
            if self.fail_logs {
                anyhow::bail!("logcat failed");
            }
            std::fs::create_dir_all(dest_dir)?;
            let path = dest_dir.join(format!("{}.log", handle.name));
            std::fs::write(&path, format!("logs of {}", handle.name))?;
            Ok(path)
        }

        async fn delete(&self, handle: &mut DeviceHandle) -> Result<()> {
            self.push(format!("delete {}", handle.name));
            if self.fail_delete {
                anyhow::bail!("device busy");
            }
            Ok(())
        }

        async fn start_screen_recording(
            &self,
            handle: &DeviceHandle,
            dest_dir: &Path,
        ) -> Result<RecordingHandle> {
            self.push(format!("record_start {}", handle.name));
            if self.fail_record_start {
                anyhow::bail!("storage not ready");
            }
            Ok(RecordingHandle {
                process: None,
                local_path: dest_dir.join(format!("{}.mp4", handle.name)),
                remote_path: None,
            })
        }

        async fn stop_screen_recording(
            &self,
            handle: &DeviceHandle,
            recording: RecordingHandle,
        ) -> Result<PathBuf> {
            self.push(format!("record_stop {}", handle.name));
            if self.fail_record_stop {
                anyhow::bail!("pull failed");
            }
            if let Some(parent) = recording.local_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&recording.local_path, b"mp4")?;
            Ok(recording.local_path)
        }
    }
}

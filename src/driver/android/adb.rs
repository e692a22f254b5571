use crate::driver::common::{run_tool, run_tool_checked, run_tool_to_file, spawn_detached, ToolOutput};
use crate::utils::{binary_resolver, env::EnvMap};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::process::Child;

/// Represents an Android device as listed by `adb devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    pub state: String,
}

impl Device {
    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }

    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Parse the output of `adb devices`
pub fn parse_devices(stdout: &str) -> Vec<Device> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                Some(Device {
                    serial: parts[0].to_string(),
                    state: parts[1].to_string(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// adb bound to a resolved binary and an explicit environment
#[derive(Debug, Clone)]
pub struct Adb {
    path: PathBuf,
    env: EnvMap,
}

impl Adb {
    pub fn resolve(env: &EnvMap) -> Result<Self> {
        Ok(Self {
            path: binary_resolver::find_adb(env)?,
            env: env.clone(),
        })
    }

    fn with_serial<'a>(serial: &'a str, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["-s", serial];
        full.extend_from_slice(args);
        full
    }

    /// Get list of attached devices
    pub async fn devices(&self) -> Result<Vec<Device>> {
        let stdout = run_tool_checked(&self.path, &["devices"], &self.env).await?;
        Ok(parse_devices(&stdout))
    }

    /// Execute an adb shell command, failing on a non-zero exit
    pub async fn shell(&self, serial: &str, cmd: &str) -> Result<String> {
        run_tool_checked(&self.path, &Self::with_serial(serial, &["shell", cmd]), &self.env).await
    }

    /// Execute an adb shell command without judging its exit code
    pub async fn shell_raw(&self, serial: &str, cmd: &str) -> Result<ToolOutput> {
        run_tool(&self.path, &Self::with_serial(serial, &["shell", cmd]), &self.env).await
    }

    /// Execute a raw adb command against one device
    pub async fn exec(&self, serial: &str, args: &[&str]) -> Result<String> {
        run_tool_checked(&self.path, &Self::with_serial(serial, args), &self.env).await
    }

    /// Pull a file from device
    pub async fn pull(&self, serial: &str, remote: &str, local: &Path) -> Result<()> {
        let local = local.to_string_lossy();
        self.exec(serial, &["pull", remote, &local]).await?;
        Ok(())
    }

    /// Stream the current logcat buffer into `dest`
    pub async fn logcat_to_file(&self, serial: &str, dest: &Path) -> Result<()> {
        run_tool_to_file(
            &self.path,
            &Self::with_serial(serial, &["logcat", "-d"]),
            &self.env,
            dest,
        )
        .await
    }

    /// Start an adb command in the background (e.g. `shell screenrecord`)
    pub fn spawn(&self, serial: &str, args: &[&str]) -> Result<Child> {
        spawn_detached(&self.path, &Self::with_serial(serial, args), &self.env)
    }

    /// AVD name of a running emulator (`adb emu avd name`)
    pub async fn avd_name(&self, serial: &str) -> Result<String> {
        let stdout = self.exec(serial, &["emu", "avd", "name"]).await?;
        stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && *l != "OK")
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Emulator {} did not report an AVD name", serial))
    }

    /// Ask an emulator to shut down
    pub async fn emu_kill(&self, serial: &str) -> Result<()> {
        self.exec(serial, &["emu", "kill"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        let out = "List of devices attached\nemulator-5554\tdevice\nemulator-5556\toffline\nR58M123\tdevice\n\n";
        let devices = parse_devices(out);
        assert_eq!(devices.len(), 3);
        assert!(devices[0].is_emulator() && devices[0].is_online());
        assert!(!devices[1].is_online());
        assert!(!devices[2].is_emulator());
    }

    #[test]
    fn test_parse_devices_empty() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
    }
}

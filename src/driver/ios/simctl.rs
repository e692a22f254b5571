//! `xcrun simctl` CLI wrapper

use crate::driver::common::{run_tool, run_tool_checked, spawn_piped, ToolOutput};
use crate::utils::{binary_resolver, env::EnvMap};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Child;

/// Simulator entry from `simctl list devices --json`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Simulator {
    pub udid: String,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub is_available: Option<bool>,
}

impl Simulator {
    pub fn is_booted(&self) -> bool {
        self.state == "Booted"
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: BTreeMap<String, Vec<Simulator>>,
}

/// Parse the JSON printed by `simctl list devices --json`, across all runtimes
pub fn parse_device_list(json: &str) -> Result<Vec<Simulator>> {
    let list: DeviceList =
        serde_json::from_str(json).context("Failed to parse simctl device list")?;
    Ok(list.devices.into_values().flatten().collect())
}

/// simctl bound to a resolved `xcrun` and an explicit environment
#[derive(Debug, Clone)]
pub struct Simctl {
    xcrun: PathBuf,
    env: EnvMap,
}

impl Simctl {
    pub fn resolve(env: &EnvMap) -> Result<Self> {
        Ok(Self {
            xcrun: binary_resolver::find_xcrun(env)?,
            env: env.clone(),
        })
    }

    fn args<'a>(args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["simctl"];
        full.extend_from_slice(args);
        full
    }

    pub async fn run(&self, args: &[&str]) -> Result<String> {
        run_tool_checked(&self.xcrun, &Self::args(args), &self.env).await
    }

    pub async fn run_raw(&self, args: &[&str]) -> Result<ToolOutput> {
        run_tool(&self.xcrun, &Self::args(args), &self.env).await
    }

    /// Simulators currently booted
    pub async fn booted(&self) -> Result<Vec<Simulator>> {
        let json = self.run(&["list", "devices", "booted", "--json"]).await?;
        Ok(parse_device_list(&json)?
            .into_iter()
            .filter(Simulator::is_booted)
            .collect())
    }

    /// Every simulator known to simctl
    pub async fn all(&self) -> Result<Vec<Simulator>> {
        let json = self.run(&["list", "devices", "--json"]).await?;
        parse_device_list(&json)
    }

    /// Clone `source` into a new simulator, returning the new UDID
    pub async fn clone_device(&self, source: &str, name: &str) -> Result<String> {
        let stdout = self.run(&["clone", source, name]).await?;
        let udid = stdout.trim();
        if udid.is_empty() {
            anyhow::bail!("simctl clone printed no UDID for {}", name);
        }
        Ok(udid.to_string())
    }

    pub async fn boot(&self, udid: &str) -> Result<()> {
        self.run(&["boot", udid]).await?;
        Ok(())
    }

    /// Shut a simulator down, treating "already shut down" as success
    pub async fn shutdown(&self, udid: &str) -> Result<()> {
        let out = self.run_raw(&["shutdown", udid]).await?;
        if out.success || out.stderr.contains("current state: Shutdown") {
            return Ok(());
        }
        anyhow::bail!("simctl shutdown {} failed: {}", udid, out.stderr.trim())
    }

    pub async fn delete(&self, udid: &str) -> Result<()> {
        self.run(&["delete", udid]).await?;
        Ok(())
    }

    /// Run a process inside the simulator
    pub async fn spawn_in(&self, udid: &str, args: &[&str]) -> Result<String> {
        let mut full = vec!["spawn", udid];
        full.extend_from_slice(args);
        self.run(&full).await
    }

    /// Export the unified log of a simulator to a `.logarchive`
    pub async fn collect_logs(&self, udid: &str, dest: &Path) -> Result<()> {
        let dest = dest.to_string_lossy();
        self.spawn_in(udid, &["log", "collect", "--output", &dest])
            .await?;
        Ok(())
    }

    /// Start `simctl io recordVideo`, with output piped for the start marker
    pub fn record_video(&self, udid: &str, dest: &Path) -> Result<Child> {
        let dest = dest.to_string_lossy();
        spawn_piped(
            &self.xcrun,
            &Self::args(&["io", udid, "recordVideo", "--codec", "h264", "-f", &dest]),
            &self.env,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = r#"{
      "devices": {
        "com.apple.CoreSimulator.SimRuntime.iOS-17-2": [
          {"udid": "AAAA-1111", "name": "iPhone 15", "state": "Booted", "isAvailable": true},
          {"udid": "BBBB-2222", "name": "iPhone 15 Pro", "state": "Shutdown", "isAvailable": true}
        ],
        "com.apple.CoreSimulator.SimRuntime.iOS-16-4": []
      }
    }"#;

    #[test]
    fn test_parse_device_list_flattens_runtimes() {
        let sims = parse_device_list(LIST).unwrap();
        assert_eq!(sims.len(), 2);
        let booted: Vec<_> = sims.iter().filter(|s| s.is_booted()).collect();
        assert_eq!(booted.len(), 1);
        assert_eq!(booted[0].udid, "AAAA-1111");
        assert_eq!(booted[0].is_available, Some(true));
    }

    #[test]
    fn test_parse_device_list_rejects_garbage() {
        assert!(parse_device_list("No devices").is_err());
    }
}

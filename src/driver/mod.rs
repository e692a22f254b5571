pub mod android;
pub mod common;
pub mod ios;
pub mod traits;

use crate::utils::{config::RunnerConfig, env::EnvMap};
use anyhow::Result;
use common::Cancellation;
use serde::{Deserialize, Serialize};
use std::fmt;
use traits::DeviceLifecycle;

/// Mobile platform of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
        }
    }
}

/// Device lifecycle implementation for `platform`
pub fn device_manager(
    platform: Platform,
    config: &RunnerConfig,
    env: &EnvMap,
    cancel: Cancellation,
) -> Result<Box<dyn DeviceLifecycle>> {
    Ok(match platform {
        Platform::Ios => Box::new(ios::IosSimulatorManager::new(config, env, cancel)?),
        Platform::Android => Box::new(android::AndroidEmulatorManager::new(config, env, cancel)?),
    })
}

/// List devices for the specified platform
pub async fn list_devices(platform: Platform, env: &EnvMap) -> Result<()> {
    match platform {
        Platform::Android => android::list_devices(env).await,
        Platform::Ios => ios::list_devices(env).await,
    }
}

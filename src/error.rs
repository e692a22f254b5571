//! Error taxonomy for the runner
//!
//! Only `Precondition`, `FlowsFailed` and `AmbiguousMerge` ever reach the
//! caller as a failure. The other variants are produced internally and are
//! downgraded to a logged skip or a failed attempt by the component that sees
//! them first.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// Workspace config or flow header could not be parsed
    #[error("Failed to parse {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// The job environment is not usable (e.g. zero or several booted devices)
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Clone, start or readiness of an ephemeral device failed
    #[error("Device {device}: {message}")]
    DeviceLifecycle { device: String, message: String },

    /// Screen recording could not be started or stopped
    #[error("Screen recording failed: {0}")]
    Recording(String),

    /// A JUnit or debug metadata file could not be read
    #[error("Failed to parse result file {path}: {message}")]
    ResultParse { path: PathBuf, message: String },

    /// Several results share a flow name and cannot be told apart
    #[error("Duplicate flow names in results: {}", .names.join(", "))]
    AmbiguousMerge { names: Vec<String> },

    /// One or more flows never passed within their retry budget
    #[error("Flows failed after all retries:\n{}", format_paths(.paths))]
    FlowsFailed { paths: Vec<PathBuf> },

    #[error("Operation cancelled")]
    Cancelled,
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

impl RunnerError {
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceLifecycle {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FlowsFailed { .. } => 1,
            Self::Precondition(_) => 2,
            Self::ConfigParse { .. } => 3,
            Self::AmbiguousMerge { .. } => 4,
            Self::ResultParse { .. } => 5,
            Self::DeviceLifecycle { .. } => 6,
            Self::Recording(_) => 7,
            Self::Cancelled => 130,
        }
    }
}

use crate::error::RunnerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

/// Result of one attempt of one flow on one ephemeral device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub flow_index: usize,
    /// 0-based; also the last part of the device name
    pub attempt_count: u32,
    pub passed: bool,
    pub logs_path: Option<PathBuf>,
    pub recording_path: Option<PathBuf>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Passed,
    Failed,
}

/// Final state of a flow after its retry loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowOutcome {
    pub flow_index: usize,
    pub path: PathBuf,
    pub status: FlowStatus,
    pub attempts: Vec<AttemptResult>,
}

impl FlowOutcome {
    pub fn new(flow_index: usize, path: PathBuf) -> Self {
        Self {
            flow_index,
            path,
            status: FlowStatus::Failed,
            attempts: Vec::new(),
        }
    }

    pub fn record(&mut self, attempt: AttemptResult) {
        if attempt.passed {
            self.status = FlowStatus::Passed;
        }
        self.attempts.push(attempt);
    }

    pub fn passed(&self) -> bool {
        self.status == FlowStatus::Passed
    }
}

/// What a finished run hands back to its caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub flows: Vec<FlowOutcome>,
    /// Set when the JUnit dialect was requested
    pub junit_report_directory: Option<PathBuf>,
    pub total_duration_ms: Option<u64>,
    /// The run stopped early on a cancellation request
    #[serde(default)]
    pub cancelled: bool,
}

impl RunSummary {
    /// Turn flows that never passed into one aggregate error
    pub fn into_result(self) -> Result<Self, RunnerError> {
        if self.cancelled {
            return Err(RunnerError::Cancelled);
        }
        let failed = self.failed_paths();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(RunnerError::FlowsFailed { paths: failed })
        }
    }

    pub fn passed(&self) -> usize {
        self.flows.iter().filter(|f| f.passed()).count()
    }

    pub fn failed_paths(&self) -> Vec<PathBuf> {
        self.flows
            .iter()
            .filter(|f| !f.passed())
            .map(|f| f.path.clone())
            .collect()
    }

    pub fn total_attempts(&self) -> usize {
        self.flows.iter().map(|f| f.attempts.len()).sum()
    }
}

/// Wall-clock tracking for a run, kept out of the serializable summary
#[derive(Debug, Clone)]
pub struct RunClock {
    started_at: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

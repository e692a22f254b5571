use crate::error::RunnerError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestCaseStatus {
    Passed,
    Failed,
}

/// One `<testcase>` of a JUnit file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JUnitTestCaseResult {
    pub name: String,
    pub status: TestCaseStatus,
    /// Milliseconds
    pub duration: u64,
    pub error_message: Option<String>,
    pub tags: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

/// Contents of one `ai-<flow>.json` debug file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowMetadata {
    pub flow_name: String,
    pub flow_file_path: String,
}

/// A JUnit test case joined with its debug metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MaestroFlowResult {
    pub name: String,
    /// Project-root-relative flow path, else the absolute path, else the name
    pub path: String,
    pub status: TestCaseStatus,
    pub error_message: Option<String>,
    pub duration: u64,
    pub retry_count: u32,
    pub tags: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

/// Wire shape handed to the result submission collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportedFlowResult {
    pub name: String,
    pub path: String,
    /// `PASSED` or `FAILED`
    pub status: String,
    pub error_message: Option<String>,
    pub duration: u64,
    pub retry_count: u32,
    pub tags: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

impl From<MaestroFlowResult> for ReportedFlowResult {
    fn from(result: MaestroFlowResult) -> Self {
        let status = match result.status {
            TestCaseStatus::Passed => "PASSED",
            TestCaseStatus::Failed => "FAILED",
        };
        Self {
            name: result.name,
            path: result.path,
            status: status.to_string(),
            error_message: result.error_message,
            duration: result.duration,
            retry_count: result.retry_count,
            tags: result.tags,
            properties: result.properties,
        }
    }
}

/// A set of results with unique flow names, ready for submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportBatch {
    results: Vec<ReportedFlowResult>,
}

impl ReportBatch {
    /// Refuse the whole batch when two results share a name; there is no
    /// safe way to pick one.
    pub fn try_new(results: Vec<MaestroFlowResult>) -> Result<Self, RunnerError> {
        let mut seen = BTreeSet::new();
        let duplicates: BTreeSet<String> = results
            .iter()
            .filter(|r| !seen.insert(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect();

        if !duplicates.is_empty() {
            return Err(RunnerError::AmbiguousMerge {
                names: duplicates.into_iter().collect(),
            });
        }

        Ok(Self {
            results: results.into_iter().map(ReportedFlowResult::from).collect(),
        })
    }

    pub fn results(&self) -> &[ReportedFlowResult] {
        &self.results
    }
}

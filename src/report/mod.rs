//! Aggregation of maestro output into flow results
//!
//! JUnit files give status, duration and messages; the `ai-*.json` debug files
//! give the flow's source path and, by counting run directories, its retries.

pub mod json;
pub mod junit;
pub mod metadata;
pub mod types;

pub use json::{JsonFileReporter, ResultReporter};
pub use junit::parse_junit_test_cases;
pub use metadata::{collect_metadata, parse_flow_metadata, MetadataIndex};
pub use types::{
    FlowMetadata, JUnitTestCaseResult, MaestroFlowResult, ReportBatch, ReportedFlowResult,
    TestCaseStatus,
};

use std::path::{Path, PathBuf};

/// Where maestro keeps its per-run debug output
pub fn default_tests_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".maestro").join("tests"))
}

/// Join JUnit cases with debug metadata, in JUnit parse order
pub fn parse_maestro_results(
    junit_dir: &Path,
    tests_dir: &Path,
    project_root: &Path,
) -> Vec<MaestroFlowResult> {
    let cases = parse_junit_test_cases(junit_dir);
    if cases.is_empty() {
        log::warn!("No JUnit test cases found in {}", junit_dir.display());
        return Vec::new();
    }

    let index = collect_metadata(tests_dir).unwrap_or_else(|e| {
        log::warn!("Ignoring debug metadata: {:#}", e);
        MetadataIndex::default()
    });

    cases
        .into_iter()
        .map(|case| {
            let path = match index.flow_file_path(&case.name) {
                Some(flow_file) => relative_flow_path(flow_file, project_root),
                None => case.name.clone(),
            };
            let retry_count = index.retry_count(&case.name);

            MaestroFlowResult {
                name: case.name,
                path,
                status: case.status,
                error_message: case.error_message,
                duration: case.duration,
                retry_count,
                tags: case.tags,
                properties: case.properties,
            }
        })
        .collect()
}

/// Aggregate and hand the batch to `reporter`. Returns the number of results
/// submitted. Duplicate flow names refuse the batch.
pub async fn report_results(
    junit_dir: &Path,
    tests_dir: &Path,
    project_root: &Path,
    reporter: &dyn ResultReporter,
) -> anyhow::Result<usize> {
    let results = parse_maestro_results(junit_dir, tests_dir, project_root);
    let batch = ReportBatch::try_new(results)?;
    reporter.submit(&batch).await?;
    Ok(batch.results().len())
}

/// `flow_file` relative to `project_root` with symlinks resolved on both
/// sides. Paths outside the root, or that cannot be resolved, are returned
/// unchanged.
fn relative_flow_path(flow_file: &str, project_root: &Path) -> String {
    let resolved = std::fs::canonicalize(flow_file)
        .and_then(|file| std::fs::canonicalize(project_root).map(|root| (file, root)));

    match resolved {
        Ok((file, root)) => match file.strip_prefix(&root) {
            Ok(relative) => relative.to_string_lossy().into_owned(),
            Err(_) => flow_file.to_string(),
        },
        Err(e) => {
            log::debug!("Could not resolve {}: {}", flow_file, e);
            flow_file.to_string()
        }
    }
}

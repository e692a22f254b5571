pub mod context;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod maestro;
pub mod recording;
pub mod state;

use crate::artifacts::LocalArtifactUploader;
use crate::driver::{self, common::Cancellation};
use crate::error::RunnerError;
use crate::parser;
use crate::report::{self, JsonFileReporter};
use crate::utils::{config::RunnerConfig, env::EnvMap};
use std::path::{Path, PathBuf};

pub use context::{RunContext, RunOptions};
pub use events::*;
pub use executor::TestRunner;
pub use maestro::{MaestroCli, OutputFormat, TestInvoker};
pub use state::*;

/// Where `run --results-json` aggregates from and writes to
#[derive(Debug, Clone)]
pub struct ResultsExport {
    pub output: PathBuf,
    pub tests_dir: PathBuf,
    pub project_root: PathBuf,
}

/// Discover, run every flow on fresh devices, upload, and optionally
/// aggregate the JUnit results.
///
/// Aggregation runs before flow failures are reported; a failed flow takes
/// precedence over an aggregation error.
pub async fn run_tests(
    options: RunOptions,
    config: &RunnerConfig,
    env: &EnvMap,
    cancel: Cancellation,
    export: Option<ResultsExport>,
) -> Result<RunSummary, RunnerError> {
    let flows = parser::discover_all(
        &options.working_dir,
        &options.flow_paths,
        &options.include_tags,
        &options.exclude_tags,
    )?;

    if flows.is_empty() {
        log::warn!("No flows selected, nothing to run");
        return Ok(RunSummary {
            flows: Vec::new(),
            junit_report_directory: None,
            total_duration_ms: None,
            cancelled: false,
        });
    }
    log::info!("Selected {} flow(s)", flows.len());

    let context = RunContext::prepare(&options.output_dir, config)
        .map_err(|e| RunnerError::Precondition(format!("{:#}", e)))?;
    let devices = driver::device_manager(options.platform, config, env, cancel.clone())
        .map_err(|e| RunnerError::Precondition(format!("{:#}", e)))?;
    let invoker = MaestroCli::resolve(config.maestro_binary.as_deref(), env)
        .map_err(|e| RunnerError::Precondition(format!("{:#}", e)))?;
    let uploader = LocalArtifactUploader::new(options.output_dir.join("artifacts"));

    let (emitter, receiver) = EventEmitter::new();
    let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

    let runner = TestRunner::new(
        devices,
        Box::new(invoker),
        Box::new(uploader),
        options,
        context,
        cancel,
        emitter,
    );
    let result = runner.run(&flows).await;
    // closes the channel so the listener drains and exits
    drop(runner);
    let _ = listener.await;

    let summary = result?;

    let exported = match (&export, &summary.junit_report_directory) {
        (Some(export), Some(junit_dir)) => export_results(junit_dir, export).await,
        (Some(_), None) => {
            log::warn!("--results-json needs JUnit output; skipping aggregation");
            Ok(())
        }
        (None, _) => Ok(()),
    };

    let summary = summary.into_result()?;
    exported.map(|_| summary)
}

async fn export_results(junit_dir: &Path, export: &ResultsExport) -> Result<(), RunnerError> {
    let reporter = JsonFileReporter::new(Some(export.output.clone()));
    report::report_results(junit_dir, &export.tests_dir, &export.project_root, &reporter)
        .await
        .map(|count| log::info!("Exported {} flow result(s)", count))
        .map_err(|e| match e.downcast::<RunnerError>() {
            Ok(err) => err,
            Err(e) => RunnerError::ResultParse {
                path: junit_dir.to_path_buf(),
                message: format!("{:#}", e),
            },
        })
}

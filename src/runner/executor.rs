use super::context::{replace_path, RunContext, RunOptions};
use super::events::{EventEmitter, RunEvent};
use super::lifecycle::{with_clean_device, DeviceTask, LogsOutcome};
use super::maestro::{Invocation, OutputFormat, TestInvoker};
use super::recording::{maybe_with_recording, RecordingOutcome};
use super::state::{AttemptResult, FlowOutcome, RunClock, RunSummary};
use crate::artifacts::{upload_directory_if_not_empty, ArtifactUploader};
use crate::driver::common::Cancellation;
use crate::driver::traits::{DeviceHandle, DeviceLifecycle, SourceDevice};
use crate::error::RunnerError;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const REPORTS_ARTIFACT: &str = "maestro-reports";
pub const DEVICE_LOGS_ARTIFACT: &str = "maestro-device-logs";

/// Drives every flow through its attempts, one ephemeral device per attempt
pub struct TestRunner {
    devices: Box<dyn DeviceLifecycle>,
    invoker: Box<dyn TestInvoker>,
    uploader: Box<dyn ArtifactUploader>,
    options: RunOptions,
    context: RunContext,
    cancel: Cancellation,
    emitter: EventEmitter,
}

/// One attempt's work on a ready device: optionally record, then invoke
struct AttemptTask<'a> {
    devices: &'a dyn DeviceLifecycle,
    invoker: &'a dyn TestInvoker,
    emitter: &'a EventEmitter,
    invocation: Invocation,
    record_screen: bool,
    scratch: PathBuf,
}

#[async_trait]
impl<'a> DeviceTask for AttemptTask<'a> {
    type Output = RecordingOutcome<Result<bool>>;

    async fn run(&self, device: &DeviceHandle) -> Result<Self::Output> {
        self.emitter.emit(RunEvent::DeviceReady {
            device: device.name.clone(),
        });
        Ok(maybe_with_recording(
            self.devices,
            self.record_screen,
            device,
            &self.scratch,
            self.invoker.invoke(&self.invocation),
        )
        .await)
    }
}

impl TestRunner {
    pub fn new(
        devices: Box<dyn DeviceLifecycle>,
        invoker: Box<dyn TestInvoker>,
        uploader: Box<dyn ArtifactUploader>,
        options: RunOptions,
        context: RunContext,
        cancel: Cancellation,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            devices,
            invoker,
            uploader,
            options,
            context,
            cancel,
            emitter,
        }
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.emitter.subscribe()
    }

    /// Run `flows` in order.
    ///
    /// Only a missing or ambiguous source device fails this call. Flow
    /// failures are reported in the summary; see [`RunSummary::into_result`].
    pub async fn run(&self, flows: &[PathBuf]) -> Result<RunSummary, RunnerError> {
        let clock = RunClock::start();

        if self.options.shards > 1 {
            log::warn!(
                "Sharding is not supported, running {} shards as 1",
                self.options.shards
            );
        }

        let source = self.devices.find_source_device().await?;
        log::info!("Using source device {}", source.identifier);
        self.devices.prepare_source(&source).await.map_err(|e| {
            RunnerError::Precondition(format!(
                "Could not prepare source device {}: {:#}",
                source.identifier, e
            ))
        })?;

        self.emitter.emit(RunEvent::RunStarted {
            platform: self.devices.platform(),
            source_device: source.identifier.clone(),
            flow_count: flows.len(),
        });

        let mut outcomes = Vec::with_capacity(flows.len());
        for (index, flow) in flows.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::warn!("Cancelled, skipping remaining {} flow(s)", flows.len() - index);
                break;
            }
            self.emitter.emit(RunEvent::FlowStarted {
                index,
                total: flows.len(),
                path: flow.clone(),
            });

            let outcome = self.run_flow(&source, index, flow).await;

            self.emitter.emit(RunEvent::FlowFinished {
                index,
                path: flow.clone(),
                status: outcome.status,
                attempts: outcome.attempts.len() as u32,
            });
            outcomes.push(outcome);
        }

        self.upload_bundles().await;

        let summary = RunSummary {
            flows: outcomes,
            junit_report_directory: (self.options.output_format == Some(OutputFormat::Junit))
                .then(|| self.context.reports_dir.clone()),
            total_duration_ms: Some(clock.elapsed_ms()),
            cancelled: self.cancel.is_cancelled(),
        };

        self.emitter.emit(RunEvent::RunFinished {
            passed: summary.passed(),
            failed: summary.flows.len() - summary.passed(),
            duration_ms: clock.elapsed_ms(),
        });

        Ok(summary)
    }

    async fn run_flow(&self, source: &SourceDevice, index: usize, flow: &Path) -> FlowOutcome {
        let max_attempts = self.options.max_attempts();
        let retries = self.options.retries;
        let mut outcome = FlowOutcome::new(index, flow.to_path_buf());

        for attempt in 0..=retries {
            if self.cancel.is_cancelled() {
                break;
            }

            let result = self.run_attempt(source, index, flow, attempt).await;
            let passed = result.passed;

            self.emitter.emit(RunEvent::AttemptFinished {
                flow_index: index,
                attempt,
                max_attempts,
                passed,
                error: result.error.clone(),
            });
            outcome.record(result);

            if passed {
                break;
            }
            if attempt < retries {
                log::warn!(
                    "{} failed on attempt {}/{}, retrying on a fresh device",
                    flow.display(),
                    attempt + 1,
                    max_attempts
                );
            } else {
                log::error!(
                    "{} failed after {} attempt(s)",
                    flow.display(),
                    max_attempts
                );
            }
        }

        outcome
    }

    async fn run_attempt(
        &self,
        source: &SourceDevice,
        index: usize,
        flow: &Path,
        attempt: u32,
    ) -> AttemptResult {
        let max_attempts = self.options.max_attempts();
        let name = self.context.device_name(index, attempt);
        let scratch = self.context.attempt_scratch(&name);
        let started = Instant::now();

        self.emitter.emit(RunEvent::AttemptStarted {
            flow_index: index,
            attempt,
            max_attempts,
            device: name.clone(),
        });

        let format = self.options.output_format;
        let task = AttemptTask {
            devices: self.devices.as_ref(),
            invoker: self.invoker.as_ref(),
            emitter: &self.emitter,
            invocation: Invocation {
                flow: flow.to_path_buf(),
                format,
                report_path: format
                    .filter(OutputFormat::writes_report)
                    .map(|f| self.context.report_path(index, flow, f)),
            },
            record_screen: self.options.record_screen,
            scratch: scratch.clone(),
        };

        let outcome =
            with_clean_device(self.devices.as_ref(), source, &name, &scratch, &task).await;

        let (passed, error, recording) = match outcome.result {
            Ok(RecordingOutcome { result, recording }) => match result {
                Ok(true) => (true, None, recording),
                Ok(false) => (false, Some("maestro test reported a failure".to_string()), recording),
                Err(e) => (false, Some(format!("{:#}", e)), recording),
            },
            Err(e) => (false, Some(format!("{:#}", e)), None),
        };

        let logs_path = self.keep_logs(index, flow, outcome.logs);

        let recording_path = match recording {
            Some(Ok(path)) if passed || attempt == self.options.retries => {
                self.keep_recording(index, attempt, &path).await
            }
            Some(Ok(path)) => {
                log::debug!("Discarding recording {} of a retried attempt", path.display());
                None
            }
            Some(Err(e)) => {
                log::warn!("{:#}", e);
                None
            }
            None => None,
        };

        for kept in [&logs_path, &recording_path].into_iter().flatten() {
            self.emitter.emit(RunEvent::Log {
                message: format!("saved {}", kept.display()),
            });
        }

        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            log::debug!("Could not remove {}: {}", scratch.display(), e);
        }

        AttemptResult {
            flow_index: index,
            attempt_count: attempt,
            passed,
            logs_path,
            recording_path,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Move collected logs to the flow's log path, replacing earlier attempts
    fn keep_logs(&self, index: usize, flow: &Path, logs: LogsOutcome) -> Option<PathBuf> {
        let LogsOutcome::Collected(collected) = logs else {
            return None;
        };
        let dest = self.context.device_log_path(index, flow, &collected);
        match replace_path(&collected, &dest) {
            Ok(()) => Some(dest),
            Err(e) => {
                log::warn!(
                    "Failed to move device logs {} to {}: {:#}",
                    collected.display(),
                    dest.display(),
                    e
                );
                None
            }
        }
    }

    /// Move a recording out of scratch and upload it on its own
    async fn keep_recording(&self, index: usize, attempt: u32, path: &Path) -> Option<PathBuf> {
        let name = self.context.recording_name(index, attempt);
        let file_name = match path.extension() {
            Some(ext) => format!("{}.{}", name, ext.to_string_lossy()),
            None => name.clone(),
        };
        let dest = self.context.recordings_dir.join(file_name);
        if let Err(e) = replace_path(path, &dest) {
            log::warn!("Failed to keep recording {}: {:#}", path.display(), e);
            return None;
        }
        if let Err(e) = self.uploader.upload_file(&dest, &name).await {
            log::warn!("Failed to upload recording {}: {:#}", dest.display(), e);
        }
        Some(dest)
    }

    async fn upload_bundles(&self) {
        upload_directory_if_not_empty(
            self.uploader.as_ref(),
            &self.context.reports_dir,
            REPORTS_ARTIFACT,
        )
        .await;
        upload_directory_if_not_empty(
            self.uploader.as_ref(),
            &self.context.device_logs_dir,
            DEVICE_LOGS_ARTIFACT,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Platform;
    use crate::runner::lifecycle::fakes::FakeDevices;
    use crate::utils::config::RunnerConfig;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Invoker that plays back scripted results and writes a report file
    #[derive(Clone, Default)]
    struct ScriptedInvoker {
        results: Arc<Mutex<Vec<bool>>>,
        seen: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl ScriptedInvoker {
        fn new(results: &[bool]) -> Self {
            let mut results = results.to_vec();
            results.reverse();
            Self {
                results: Arc::new(Mutex::new(results)),
                seen: Default::default(),
            }
        }
    }

    #[async_trait]
    impl TestInvoker for ScriptedInvoker {
        async fn invoke(&self, invocation: &Invocation) -> Result<bool> {
            self.seen.lock().unwrap().push(invocation.args());
            if let Some(path) = &invocation.report_path {
                std::fs::write(path, "<testsuites/>")?;
            }
            Ok(self.results.lock().unwrap().pop().unwrap_or(false))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingUploader {
        uploads: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ArtifactUploader for RecordingUploader {
        async fn upload_file(&self, _path: &Path, name: &str) -> Result<()> {
            self.uploads.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn upload_directory(&self, _dir: &Path, name: &str) -> Result<()> {
            self.uploads.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    struct Harness {
        out: TempDir,
        invoker: ScriptedInvoker,
        uploader: RecordingUploader,
        devices: Arc<FakeDevices>,
    }

    /// Shares the fake between the runner and the assertions
    struct SharedDevices(Arc<FakeDevices>);

    #[async_trait]
    impl DeviceLifecycle for SharedDevices {
        fn platform(&self) -> Platform {
            self.0.platform()
        }
        async fn find_source_device(&self) -> Result<SourceDevice, RunnerError> {
            self.0.find_source_device().await
        }
        async fn prepare_source(&self, source: &SourceDevice) -> Result<()> {
            self.0.prepare_source(source).await
        }
        async fn clone_device(&self, source: &SourceDevice, name: &str) -> Result<DeviceHandle> {
            self.0.clone_device(source, name).await
        }
        async fn start(&self, handle: &mut DeviceHandle) -> Result<()> {
            self.0.start(handle).await
        }
        async fn wait_for_ready(&self, handle: &DeviceHandle) -> Result<()> {
            self.0.wait_for_ready(handle).await
        }
        async fn collect_logs(&self, handle: &DeviceHandle, dest: &Path) -> Result<PathBuf> {
            self.0.collect_logs(handle, dest).await
        }
        async fn delete(&self, handle: &mut DeviceHandle) -> Result<()> {
            self.0.delete(handle).await
        }
        async fn start_screen_recording(
            &self,
            handle: &DeviceHandle,
            dest: &Path,
        ) -> Result<crate::driver::traits::RecordingHandle> {
            self.0.start_screen_recording(handle, dest).await
        }
        async fn stop_screen_recording(
            &self,
            handle: &DeviceHandle,
            recording: crate::driver::traits::RecordingHandle,
        ) -> Result<PathBuf> {
            self.0.stop_screen_recording(handle, recording).await
        }
    }

    impl Harness {
        fn new(results: &[bool], devices: FakeDevices) -> Self {
            Self {
                out: TempDir::new().unwrap(),
                invoker: ScriptedInvoker::new(results),
                uploader: RecordingUploader::default(),
                devices: Arc::new(devices),
            }
        }

        fn runner(&self, tweak: impl FnOnce(&mut RunOptions)) -> TestRunner {
            let mut options = RunOptions::new(Platform::Android, vec![], self.out.path().into());
            options.output_format = Some(OutputFormat::Junit);
            tweak(&mut options);
            let context = RunContext::prepare(self.out.path(), &RunnerConfig::default()).unwrap();
            TestRunner::new(
                Box::new(SharedDevices(self.devices.clone())),
                Box::new(self.invoker.clone()),
                Box::new(self.uploader.clone()),
                options,
                context,
                Cancellation::new(),
                EventEmitter::default(),
            )
        }

        fn uploads(&self) -> Vec<String> {
            self.uploader.uploads.lock().unwrap().clone()
        }
    }

    fn flows(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/w/{}.yaml", n))).collect()
    }

    #[tokio::test]
    async fn test_pass_on_first_attempt_stops_retrying() {
        let h = Harness::new(&[true], FakeDevices::new());
        let summary = h.runner(|_| {}).run(&flows(&["login"])).await.unwrap();

        assert_eq!(summary.flows[0].attempts.len(), 1);
        assert!(summary.flows[0].passed());
        assert_eq!(
            summary.junit_report_directory,
            Some(h.out.path().join("reports"))
        );
        assert!(summary.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_retry_uses_fresh_device_and_overwrites_logs() {
        let h = Harness::new(&[false, true], FakeDevices::new());
        let summary = h.runner(|_| {}).run(&flows(&["login"])).await.unwrap();

        let flow = &summary.flows[0];
        assert_eq!(flow.attempts.len(), 2);
        assert!(flow.passed());
        assert_eq!(flow.attempts[0].attempt_count, 0);
        assert_eq!(flow.attempts[1].attempt_count, 1);

        let calls = h.devices.calls();
        assert!(calls.contains(&"clone maestro-device-0-0".to_string()));
        assert!(calls.contains(&"delete maestro-device-0-0".to_string()));
        assert!(calls.contains(&"clone maestro-device-0-1".to_string()));

        let log = h.out.path().join("device-logs").join("0-login.log");
        assert_eq!(
            std::fs::read_to_string(&log).unwrap(),
            "logs of maestro-device-0-1"
        );
        assert_eq!(flow.attempts[0].logs_path.as_ref(), Some(&log));
    }

    #[tokio::test]
    async fn test_same_report_path_for_every_attempt() {
        let h = Harness::new(&[false, false], FakeDevices::new());
        let _ = h.runner(|_| {}).run(&flows(&["login"])).await.unwrap();

        let seen = h.invoker.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        let report = h.out.path().join("reports").join("0-login.xml");
        assert!(seen[0].contains(&report.display().to_string()));
    }

    #[tokio::test]
    async fn test_previous_run_reports_do_not_leak_into_bundles() {
        let h = Harness::new(&[true], FakeDevices::new());
        let reports = h.out.path().join("reports");
        let device_logs = h.out.path().join("device-logs");
        std::fs::create_dir_all(&reports).unwrap();
        std::fs::create_dir_all(&device_logs).unwrap();
        std::fs::write(
            reports.join("1-login.xml"),
            r#"<testsuites><testsuite>
                <testcase name="login" status="ERROR"><failure>stale</failure></testcase>
            </testsuite></testsuites>"#,
        )
        .unwrap();
        std::fs::write(device_logs.join("maestro-device-1-0.log"), "stale").unwrap();

        let summary = h.runner(|_| {}).run(&flows(&["login"])).await.unwrap();
        assert!(summary.flows[0].passed());

        let mut names: Vec<String> = std::fs::read_dir(&reports)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["0-login.xml".to_string()]);
        assert!(!device_logs.join("maestro-device-1-0.log").exists());
        assert!(crate::report::parse_junit_test_cases(&reports).is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_flows_and_aggregate() {
        let h = Harness::new(&[false, false, true], FakeDevices::new());
        let summary = h
            .runner(|o| o.retries = 1)
            .run(&flows(&["login", "home"]))
            .await
            .unwrap();

        assert_eq!(summary.flows.len(), 2);
        assert!(!summary.flows[0].passed());
        assert!(summary.flows[1].passed());

        // bundles were uploaded before the failure is raised
        let uploads = h.uploads();
        assert!(uploads.contains(&REPORTS_ARTIFACT.to_string()));
        assert!(uploads.contains(&DEVICE_LOGS_ARTIFACT.to_string()));

        match summary.into_result() {
            Err(RunnerError::FlowsFailed { paths }) => {
                assert_eq!(paths, vec![PathBuf::from("/w/login.yaml")])
            }
            other => panic!("expected FlowsFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let h = Harness::new(&[false, true], FakeDevices::new());
        let summary = h
            .runner(|o| o.retries = 0)
            .run(&flows(&["login"]))
            .await
            .unwrap();
        assert_eq!(summary.flows[0].attempts.len(), 1);
        assert!(!summary.flows[0].passed());
    }

    #[tokio::test]
    async fn test_missing_source_aborts_before_any_flow() {
        let h = Harness::new(
            &[true],
            FakeDevices {
                source_count: 2,
                ..FakeDevices::new()
            },
        );
        let err = h.runner(|_| {}).run(&flows(&["login"])).await.unwrap_err();
        assert!(matches!(err, RunnerError::Precondition(_)));
        assert!(!h.devices.calls().iter().any(|c| c.starts_with("clone")));
        assert!(h.invoker.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_failure_counts_as_failed_attempt() {
        let h = Harness::new(
            &[true, true],
            FakeDevices {
                fail_ready: true,
                ..FakeDevices::new()
            },
        );
        let summary = h.runner(|_| {}).run(&flows(&["login"])).await.unwrap();
        let flow = &summary.flows[0];
        assert_eq!(flow.attempts.len(), 2);
        assert!(!flow.passed());
        assert!(flow.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not ready"));
        assert!(h.invoker.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recordings_uploaded_for_passing_and_final_attempts_only() {
        let h = Harness::new(&[false, true, false, false], FakeDevices::new());
        let summary = h
            .runner(|o| o.record_screen = true)
            .run(&flows(&["login", "home"]))
            .await
            .unwrap();
        assert_eq!(summary.total_attempts(), 4);

        let recordings: Vec<String> = h
            .uploads()
            .into_iter()
            .filter(|u| u.starts_with("maestro-recording"))
            .collect();
        assert_eq!(
            recordings,
            vec!["maestro-recording-0-1", "maestro-recording-1-1"]
        );
    }

    #[tokio::test]
    async fn test_recording_failure_does_not_fail_attempt() {
        let h = Harness::new(
            &[true],
            FakeDevices {
                fail_record_stop: true,
                ..FakeDevices::new()
            },
        );
        let summary = h
            .runner(|o| o.record_screen = true)
            .run(&flows(&["login"]))
            .await
            .unwrap();
        assert!(summary.flows[0].passed());
        assert!(summary.flows[0].attempts[0].recording_path.is_none());
    }

    #[tokio::test]
    async fn test_kept_recording_lands_in_recordings_dir() {
        let h = Harness::new(&[true], FakeDevices::new());
        let summary = h
            .runner(|o| o.record_screen = true)
            .run(&flows(&["login"]))
            .await
            .unwrap();
        let kept = summary.flows[0].attempts[0].recording_path.clone().unwrap();
        assert_eq!(
            kept,
            h.out.path().join("recordings").join("maestro-recording-0-0.mp4")
        );
        assert!(kept.is_file());
        assert!(!h.out.path().join(".scratch").join("maestro-device-0-0").exists());
    }

    #[tokio::test]
    async fn test_non_junit_format_has_no_report_directory() {
        let h = Harness::new(&[true], FakeDevices::new());
        let summary = h
            .runner(|o| o.output_format = None)
            .run(&flows(&["login"]))
            .await
            .unwrap();
        assert!(summary.junit_report_directory.is_none());
        assert_eq!(h.invoker.seen.lock().unwrap()[0], vec!["test", "/w/login.yaml"]);
        // nothing was written to reports, so only logs get bundled
        assert_eq!(h.uploads(), vec![DEVICE_LOGS_ARTIFACT.to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_flows() {
        let h = Harness::new(&[true], FakeDevices::new());
        let runner = h.runner(|_| {});
        runner.cancel.cancel();
        let summary = runner.run(&flows(&["login"])).await.unwrap();
        assert!(summary.flows.is_empty());
        assert!(matches!(summary.into_result(), Err(RunnerError::Cancelled)));
    }
}

//! Optional screen recording around a unit of work

use crate::driver::traits::{DeviceHandle, DeviceLifecycle};
use crate::error::RunnerError;
use anyhow::Result;
use std::future::Future;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RecordingOutcome<T> {
    pub result: T,
    /// `None` when recording was off or never started
    pub recording: Option<Result<PathBuf>>,
}

/// Run `work`, recording the screen of `handle` into `dest_dir` when asked.
///
/// Recording problems never change `work`'s result: a failed start runs the
/// work unrecorded, a failed stop is returned as a `Recording` error.
pub async fn maybe_with_recording<T, Fut>(
    manager: &dyn DeviceLifecycle,
    should_record: bool,
    handle: &DeviceHandle,
    dest_dir: &Path,
    work: Fut,
) -> RecordingOutcome<T>
where
    Fut: Future<Output = T>,
{
    if !should_record {
        return RecordingOutcome {
            result: work.await,
            recording: None,
        };
    }

    let recording = match manager.start_screen_recording(handle, dest_dir).await {
        Ok(recording) => Some(recording),
        Err(e) => {
            log::warn!(
                "Could not start screen recording on {}, continuing without: {:#}",
                handle.name,
                e
            );
            None
        }
    };

    let result = work.await;

    let recording: Option<Result<PathBuf>> = match recording {
        Some(recording) => Some(
            manager
                .stop_screen_recording(handle, recording)
                .await
                .map_err(|e| {
                    RunnerError::Recording(format!("stopping on {}: {:#}", handle.name, e)).into()
                }),
        ),
        None => None,
    };

    RecordingOutcome { result, recording }
}

use super::maestro::OutputFormat;
use crate::driver::Platform;
use crate::utils::config::RunnerConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Options of one `run` invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub platform: Platform,
    /// Files or directories; discovered independently, concatenated in order
    pub flow_paths: Vec<PathBuf>,
    /// Extra attempts after the first failure
    pub retries: u32,
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    /// Accepted but always forced to 1
    pub shards: u32,
    pub output_format: Option<OutputFormat>,
    pub record_screen: bool,
    pub output_dir: PathBuf,
    /// Base for relative flow paths
    pub working_dir: PathBuf,
}

impl RunOptions {
    pub fn new(platform: Platform, flow_paths: Vec<PathBuf>, output_dir: PathBuf) -> Self {
        Self {
            platform,
            flow_paths,
            retries: 1,
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            shards: 1,
            output_format: None,
            record_screen: false,
            output_dir,
            working_dir: PathBuf::from("."),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Output layout of a run
///
/// ```text
/// <output>/reports/<flowIndex>-<stem>.<ext>
/// <output>/device-logs/<flowIndex>-<stem>.<ext>
/// <output>/recordings/maestro-recording-<flowIndex>-<attempt>.mp4
/// <output>/.scratch/<device>/   (raw logs and recordings before they move)
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    pub output_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub device_logs_dir: PathBuf,
    pub recordings_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub device_name_prefix: String,
}

impl RunContext {
    pub fn prepare(output_dir: &Path, config: &RunnerConfig) -> Result<Self> {
        let ctx = Self {
            output_dir: output_dir.to_path_buf(),
            reports_dir: output_dir.join("reports"),
            device_logs_dir: output_dir.join("device-logs"),
            recordings_dir: output_dir.join("recordings"),
            scratch_dir: config.scratch_dir_for(output_dir),
            device_name_prefix: config.device_name_prefix.clone(),
        };

        // Bundles and aggregation must only see this run's files
        for dir in [&ctx.reports_dir, &ctx.device_logs_dir, &ctx.recordings_dir] {
            if dir.exists() {
                log::info!("Clearing previous results in {}", dir.display());
                std::fs::remove_dir_all(dir)
                    .with_context(|| format!("Failed to clear {}", dir.display()))?;
            }
        }

        for dir in [&ctx.reports_dir, &ctx.device_logs_dir, &ctx.scratch_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(ctx)
    }

    /// `<prefix>-<flowIndex>-<attemptCount>`
    pub fn device_name(&self, flow_index: usize, attempt: u32) -> String {
        format!("{}-{}-{}", self.device_name_prefix, flow_index, attempt)
    }

    /// Report path shared by every attempt of a flow
    pub fn report_path(&self, flow_index: usize, flow: &Path, format: OutputFormat) -> PathBuf {
        self.reports_dir.join(format!(
            "{}-{}.{}",
            flow_index,
            flow_stem(flow),
            format.extension()
        ))
    }

    /// Final home of a flow's device logs, keeping the extension of `collected`
    pub fn device_log_path(&self, flow_index: usize, flow: &Path, collected: &Path) -> PathBuf {
        let name = match collected.extension() {
            Some(ext) => format!("{}-{}.{}", flow_index, flow_stem(flow), ext.to_string_lossy()),
            None => format!("{}-{}", flow_index, flow_stem(flow)),
        };
        self.device_logs_dir.join(name)
    }

    /// Name of the recording kept for an attempt
    pub fn recording_name(&self, flow_index: usize, attempt: u32) -> String {
        format!("maestro-recording-{}-{}", flow_index, attempt)
    }

    /// Scratch directory for one attempt's raw outputs
    pub fn attempt_scratch(&self, device_name: &str) -> PathBuf {
        self.scratch_dir.join(device_name)
    }
}

fn flow_stem(flow: &Path) -> String {
    flow.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flow".to_string())
}

/// Move `from` to `to`, replacing whatever is there. Falls back to a copy
/// when a rename is not possible (e.g. across filesystems).
pub fn replace_path(from: &Path, to: &Path) -> Result<()> {
    if to.is_dir() {
        std::fs::remove_dir_all(to)?;
    } else if to.exists() {
        std::fs::remove_file(to)?;
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    if from.is_dir() {
        for entry in walkdir::WalkDir::new(from) {
            let entry = entry?;
            let target = to.join(entry.path().strip_prefix(from)?);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else {
                std::fs::copy(entry.path(), &target)?;
            }
        }
        std::fs::remove_dir_all(from)?;
    } else {
        std::fs::copy(from, to)
            .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_and_names() {
        let out = TempDir::new().unwrap();
        let ctx = RunContext::prepare(out.path(), &RunnerConfig::default()).unwrap();
        assert!(ctx.reports_dir.is_dir());
        assert!(ctx.device_logs_dir.is_dir());

        assert_eq!(ctx.device_name(3, 2), "maestro-device-3-2");
        assert_eq!(
            ctx.report_path(0, Path::new("/w/login.yaml"), OutputFormat::Junit),
            out.path().join("reports").join("0-login.xml")
        );
        assert_eq!(
            ctx.device_log_path(1, Path::new("/w/home.yml"), Path::new("/s/dev.logarchive")),
            out.path().join("device-logs").join("1-home.logarchive")
        );
    }

    #[test]
    fn test_prepare_clears_previous_run() {
        let out = TempDir::new().unwrap();
        let stale_report = out.path().join("reports").join("1-login.xml");
        let stale_log = out.path().join("device-logs").join("1-login.log");
        let stale_video = out.path().join("recordings").join("maestro-recording-1-0.mp4");
        let keep = out.path().join("notes.txt");
        for file in [&stale_report, &stale_log, &stale_video] {
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, "old").unwrap();
        }
        std::fs::write(&keep, "mine").unwrap();

        let ctx = RunContext::prepare(out.path(), &RunnerConfig::default()).unwrap();
        assert!(ctx.reports_dir.is_dir());
        assert!(!stale_report.exists());
        assert!(!stale_log.exists());
        assert!(!stale_video.exists());
        assert!(keep.is_file());
    }

    #[test]
    fn test_replace_path_overwrites_file_and_dir() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("logs").join("0-home.log");

        let first = dir.path().join("a.log");
        std::fs::write(&first, "first").unwrap();
        replace_path(&first, &dest).unwrap();

        let second = dir.path().join("b.log");
        std::fs::write(&second, "second").unwrap();
        replace_path(&second, &dest).unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "second");
        assert!(!second.exists());

        let archive = dir.path().join("x.logarchive");
        std::fs::create_dir_all(archive.join("inner")).unwrap();
        std::fs::write(archive.join("inner/data"), "d").unwrap();
        let dest_dir = dir.path().join("logs").join("0-home.logarchive");
        std::fs::create_dir_all(&dest_dir).unwrap();
        std::fs::write(dest_dir.join("stale"), "s").unwrap();
        replace_path(&archive, &dest_dir).unwrap();
        assert!(dest_dir.join("inner/data").is_file());
        assert!(!dest_dir.join("stale").exists());
    }

    #[test]
    fn test_attempts_are_retries_plus_one() {
        let mut opts = RunOptions::new(Platform::Ios, vec![], PathBuf::from("out"));
        assert_eq!(opts.max_attempts(), 2);
        opts.retries = 0;
        assert_eq!(opts.max_attempts(), 1);
    }
}

//! Common utilities shared across platform device managers
//!
//! Bounded polling, cancellation, and subprocess helpers used by the iOS and
//! Android implementations.

use crate::utils::env::EnvMap;
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};

// ============================================================================
// Polling Utilities
// ============================================================================

/// Cooperative cancellation flag shared by every bounded poll of a run
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Timed out waiting for {description} after {attempts} attempts")]
    Exhausted { description: String, attempts: u32 },

    #[error("Cancelled while waiting for {description}")]
    Cancelled { description: String },
}

/// Fixed-interval bounded retry policy
///
/// The attempt cap is the only timeout: a check that never succeeds runs
/// exactly `max_attempts` times with `interval` (+ optional jitter) between
/// consecutive runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub jitter_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::every_second(60)
    }
}

impl RetryPolicy {
    pub fn every_second(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval_ms: 1000,
            jitter_ms: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = Some(jitter.as_millis() as u64);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Longest the policy waits, ignoring jitter
    pub fn budget(&self) -> Duration {
        self.interval() * self.max_attempts
    }

    fn next_delay(&self) -> Duration {
        let jitter = match self.jitter_ms {
            Some(max) if max > 0 => rand::thread_rng().gen_range(0..=max),
            _ => 0,
        };
        Duration::from_millis(self.interval_ms + jitter)
    }

    /// Run `check` until it yields `Some`, the attempts run out, or the run
    /// is cancelled. A check error counts as "not ready yet".
    pub async fn poll_until<T, F, Fut>(
        &self,
        cancel: &Cancellation,
        description: &str,
        mut check: F,
    ) -> std::result::Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled {
                    description: description.to_string(),
                });
            }

            match check().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => log::debug!("{} not ready (attempt {}): {:#}", description, attempt, e),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.next_delay()).await;
            }
        }

        Err(PollError::Exhausted {
            description: description.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Boolean flavour of [`poll_until`](Self::poll_until)
    pub async fn wait_until<F, Fut>(
        &self,
        cancel: &Cancellation,
        description: &str,
        mut check: F,
    ) -> std::result::Result<(), PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.poll_until(cancel, description, || {
            let fut = check();
            async move { Ok::<_, anyhow::Error>(fut.await?.then_some(())) }
        })
        .await
    }
}

// ============================================================================
// Process Utilities
// ============================================================================

/// Captured result of a finished tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn command(program: &Path, args: &[&str], env: &EnvMap) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args).env_clear().envs(env.iter());
    cmd
}

fn describe(program: &Path, args: &[&str]) -> String {
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    format!("{} {}", name, args.join(" "))
}

/// Run a tool to completion, capturing output, without judging its exit code
pub async fn run_tool(program: &Path, args: &[&str], env: &EnvMap) -> Result<ToolOutput> {
    let output = command(program, args, env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to execute: {}", describe(program, args)))?;

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a tool and fail on a non-zero exit, returning stdout
pub async fn run_tool_checked(program: &Path, args: &[&str], env: &EnvMap) -> Result<String> {
    let output = run_tool(program, args, env).await?;
    if !output.success {
        anyhow::bail!(
            "{} exited with {:?}: {}",
            describe(program, args),
            output.code,
            output.stderr.trim()
        );
    }
    Ok(output.stdout)
}

/// Run a tool with its stdout written straight into `dest`
pub async fn run_tool_to_file(
    program: &Path,
    args: &[&str],
    env: &EnvMap,
    dest: &Path,
) -> Result<()> {
    let file = std::fs::File::create(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let status = command(program, args, env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(file))
        .stderr(Stdio::null())
        .status()
        .await
        .with_context(|| format!("Failed to execute: {}", describe(program, args)))?;

    if !status.success() {
        anyhow::bail!("{} exited with {:?}", describe(program, args), status.code());
    }
    Ok(())
}

/// Start a long-lived background process the runner does not wait on.
/// The returned handle is kept for an explicit stop later.
pub fn spawn_detached(program: &Path, args: &[&str], env: &EnvMap) -> Result<Child> {
    command(program, args, env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false)
        .spawn()
        .with_context(|| format!("Failed to spawn: {}", describe(program, args)))
}

/// Start a background process with stdout and stderr piped
pub fn spawn_piped(program: &Path, args: &[&str], env: &EnvMap) -> Result<Child> {
    command(program, args, env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false)
        .spawn()
        .with_context(|| format!("Failed to spawn: {}", describe(program, args)))
}

/// Ask a child to stop the way Ctrl+C would, falling back to a hard kill
pub fn send_interrupt(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) on a pid we spawned and still own
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if rc == 0 {
                return Ok(());
            }
            log::debug!("SIGINT to {} failed, killing instead", pid);
        }
    }
    child.start_kill().context("Failed to stop child process")
}

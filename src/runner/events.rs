use super::state::FlowStatus;
use crate::driver::Platform;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Run progress events for real-time updates
#[derive(Debug, Clone)]
pub enum RunEvent {
    // Run events
    RunStarted {
        platform: Platform,
        source_device: String,
        flow_count: usize,
    },
    RunFinished {
        passed: usize,
        failed: usize,
        duration_ms: u64,
    },

    // Flow events
    FlowStarted {
        index: usize,
        total: usize,
        path: PathBuf,
    },
    FlowFinished {
        index: usize,
        path: PathBuf,
        status: FlowStatus,
        attempts: u32,
    },

    // Attempt events, `attempt` counts from 0
    AttemptStarted {
        flow_index: usize,
        attempt: u32,
        max_attempts: u32,
        device: String,
    },
    DeviceReady {
        device: String,
    },
    AttemptFinished {
        flow_index: usize,
        attempt: u32,
        max_attempts: u32,
        passed: bool,
        error: Option<String>,
    },

    // Log event for coordinated output
    Log {
        message: String,
    },
}

/// Event emitter for broadcasting run events
pub struct EventEmitter {
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<RunEvent>) {
        let (sender, receiver) = broadcast::channel(100);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }
}

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<RunEvent>) {
        use colored::Colorize;
        use std::io::IsTerminal;

        let tty = std::io::stdout().is_terminal();
        // Spinner shown while an ephemeral device boots
        let mut boot_spinner: Option<ProgressBar> = None;

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Console listener skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                RunEvent::RunStarted {
                    platform,
                    source_device,
                    flow_count,
                } => {
                    println!(
                        "\n{} Running {} flow(s) on {} (source device {})",
                        "▶".green().bold(),
                        flow_count,
                        platform.to_string().cyan(),
                        source_device.cyan()
                    );
                }

                RunEvent::RunFinished {
                    passed,
                    failed,
                    duration_ms,
                } => {
                    if let Some(pb) = boot_spinner.take() {
                        pb.finish_and_clear();
                    }
                    println!("\n{} Run finished", "■".blue().bold());
                    println!("  Total flows: {}", passed + failed);
                    println!(
                        "  {} passed, {} failed",
                        passed.to_string().green(),
                        failed.to_string().red()
                    );
                    println!("  Duration: {}ms", duration_ms);
                }

                RunEvent::FlowStarted { index, total, path } => {
                    println!(
                        "\n  {} Flow {}/{}: {}",
                        "→".blue(),
                        index + 1,
                        total,
                        path.display().to_string().white().bold()
                    );
                }

                RunEvent::FlowFinished {
                    path,
                    status,
                    attempts,
                    ..
                } => {
                    let status_str = match status {
                        FlowStatus::Passed => "PASSED".green().bold(),
                        FlowStatus::Failed => "FAILED".red().bold(),
                    };
                    println!(
                        "  {} Flow {} [{}] after {} attempt(s)",
                        "←".blue(),
                        path.display(),
                        status_str,
                        attempts
                    );
                }

                RunEvent::AttemptStarted {
                    attempt,
                    max_attempts,
                    device,
                    ..
                } => {
                    let message = format!(
                        "Attempt {}/{}: preparing {}",
                        attempt + 1,
                        max_attempts,
                        device.dimmed()
                    );
                    let pb = if tty {
                        ProgressBar::new_spinner()
                    } else {
                        ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
                    };
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("    {spinner} {msg}")
                    {
                        pb.set_style(style);
                    }
                    pb.set_message(message.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));
                    if !tty {
                        println!("    {}", message);
                    }
                    boot_spinner = Some(pb);
                }

                RunEvent::DeviceReady { device } => {
                    if let Some(pb) = boot_spinner.take() {
                        pb.finish_and_clear();
                    }
                    println!("    {} {} ready", "✓".green(), device);
                }

                RunEvent::AttemptFinished {
                    attempt,
                    max_attempts,
                    passed,
                    error,
                    ..
                } => {
                    if let Some(pb) = boot_spinner.take() {
                        pb.finish_and_clear();
                    }
                    if passed {
                        println!(
                            "    {} Attempt {}/{} passed",
                            "✓".green(),
                            attempt + 1,
                            max_attempts
                        );
                    } else {
                        let retry = if attempt + 1 < max_attempts {
                            " ↻ retrying on a fresh device".yellow()
                        } else {
                            "".normal()
                        };
                        println!(
                            "    {} Attempt {}/{} failed{}",
                            "✗".red(),
                            attempt + 1,
                            max_attempts,
                            retry
                        );
                        if let Some(error) = error {
                            println!("      {}", error.dimmed());
                        }
                    }
                }

                RunEvent::Log { message } => match &boot_spinner {
                    Some(pb) => pb.println(format!("      {}", message)),
                    None => println!("      {}", message),
                },
            }
        }
    }
}

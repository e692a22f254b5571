//! External test runner invocation

use crate::utils::{binary_resolver, env::EnvMap};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Report dialect requested from maestro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Junit,
    Html,
    Noop,
}

impl OutputFormat {
    /// Value passed to `maestro test --format`
    pub fn cli_value(&self) -> &'static str {
        match self {
            OutputFormat::Junit => "JUNIT",
            OutputFormat::Html => "HTML",
            OutputFormat::Noop => "NOOP",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Junit => "xml",
            OutputFormat::Html => "html",
            OutputFormat::Noop => "txt",
        }
    }

    /// Whether the format writes a report file worth pointing `--output` at
    pub fn writes_report(&self) -> bool {
        !matches!(self, OutputFormat::Noop)
    }
}

/// One test invocation request
#[derive(Debug, Clone)]
pub struct Invocation {
    pub flow: PathBuf,
    pub format: Option<OutputFormat>,
    pub report_path: Option<PathBuf>,
}

impl Invocation {
    /// `test [--format F --output PATH] <flow>`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["test".to_string()];
        if let Some(format) = self.format {
            args.push("--format".to_string());
            args.push(format.cli_value().to_string());
            if let Some(path) = &self.report_path {
                args.push("--output".to_string());
                args.push(path.display().to_string());
            }
        }
        args.push(self.flow.display().to_string());
        args
    }
}

/// Runs one flow against whatever device is currently booted
#[async_trait]
pub trait TestInvoker: Send + Sync {
    /// `Ok(true)` when the flow passed, `Ok(false)` when it failed
    async fn invoke(&self, invocation: &Invocation) -> Result<bool>;
}

/// The `maestro` CLI
pub struct MaestroCli {
    binary: PathBuf,
    env: EnvMap,
}

impl MaestroCli {
    pub fn new(binary: PathBuf, env: EnvMap) -> Self {
        Self { binary, env }
    }

    /// Use `explicit` if given, otherwise look maestro up on `PATH` and in
    /// `~/.maestro/bin`
    pub fn resolve(explicit: Option<&Path>, env: &EnvMap) -> Result<Self> {
        let env = binary_resolver::with_maestro(env);
        let binary = match explicit {
            Some(path) => path.to_path_buf(),
            None => binary_resolver::find_maestro(&env)?,
        };
        Ok(Self::new(binary, env))
    }
}

#[async_trait]
impl TestInvoker for MaestroCli {
    async fn invoke(&self, invocation: &Invocation) -> Result<bool> {
        let args = invocation.args();
        log::debug!("{} {}", self.binary.display(), args.join(" "));

        // Output is inherited so the flow log streams live
        let status = Command::new(&self.binary)
            .args(&args)
            .env_clear()
            .envs(self.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary.display()))?;

        Ok(status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_without_format() {
        let inv = Invocation {
            flow: PathBuf::from("/w/login.yaml"),
            format: None,
            report_path: Some(PathBuf::from("/out/0-login.xml")),
        };
        assert_eq!(inv.args(), vec!["test", "/w/login.yaml"]);
    }

    #[test]
    fn test_args_with_junit_output() {
        let inv = Invocation {
            flow: PathBuf::from("/w/login.yaml"),
            format: Some(OutputFormat::Junit),
            report_path: Some(PathBuf::from("/out/0-login.xml")),
        };
        assert_eq!(
            inv.args(),
            vec![
                "test",
                "--format",
                "JUNIT",
                "--output",
                "/out/0-login.xml",
                "/w/login.yaml"
            ]
        );
    }

    #[tokio::test]
    async fn test_exit_status_decides_pass() {
        let env = EnvMap::from_process();
        let Ok(true_bin) = binary_resolver::find_binary("true", &env) else {
            return;
        };
        let Ok(false_bin) = binary_resolver::find_binary("false", &env) else {
            return;
        };
        let inv = Invocation {
            flow: PathBuf::from("flow.yaml"),
            format: None,
            report_path: None,
        };

        assert!(MaestroCli::new(true_bin, env.clone()).invoke(&inv).await.unwrap());
        assert!(!MaestroCli::new(false_bin, env).invoke(&inv).await.unwrap());
    }
}

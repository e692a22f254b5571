use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use maestro_runner::driver::{self, common::Cancellation, Platform};
use maestro_runner::error::RunnerError;
use maestro_runner::report::{self, JsonFileReporter};
use maestro_runner::runner::{self, OutputFormat, ResultsExport, RunOptions};
use maestro_runner::utils::{config::RunnerConfig, env::EnvMap};

#[derive(Parser)]
#[command(name = "maestro-runner")]
#[command(version)]
#[command(about = "Run Maestro flows on ephemeral simulators and emulators", long_about = None)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run flows, each attempt on a freshly cloned device
    Run {
        /// Flow files or directories, discovered in order
        #[arg(required = true)]
        flow_paths: Vec<PathBuf>,

        /// Target platform
        #[arg(short, long, value_enum)]
        platform: Platform,

        /// Extra attempts for a failing flow
        #[arg(long, default_value = "1")]
        retries: u32,

        /// Only run flows with one of these tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        include_tags: Vec<String>,

        /// Skip flows with any of these tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude_tags: Vec<String>,

        /// Accepted for compatibility; always runs as one shard
        #[arg(long, default_value = "1")]
        shards: u32,

        /// Report format passed to maestro
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Record the screen of every attempt
        #[arg(long, short = 'r', default_value = "false")]
        record_screen: bool,

        /// Output directory for reports, logs and artifacts
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Runner configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Aggregate JUnit results into this JSON file after the run
        #[arg(long)]
        results_json: Option<PathBuf>,
    },

    /// Print the flows a run would execute
    Discover {
        /// Flow files or directories
        #[arg(required = true)]
        flow_paths: Vec<PathBuf>,

        #[arg(long, value_delimiter = ',')]
        include_tags: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        exclude_tags: Vec<String>,
    },

    /// Aggregate JUnit output and maestro debug metadata
    Report {
        /// Directory of JUnit XML files
        #[arg(long)]
        junit_dir: PathBuf,

        /// Maestro tests directory (default ~/.maestro/tests)
        #[arg(long)]
        tests_dir: Option<PathBuf>,

        /// Root that flow paths are made relative to (default cwd)
        #[arg(long)]
        project_root: Option<PathBuf>,

        /// Output file path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List booted devices
    Devices {
        /// Target platform
        #[arg(short, long, value_enum)]
        platform: Platform,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    if let Err(e) = execute(cli.command).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        let code = e
            .downcast_ref::<RunnerError>()
            .map(RunnerError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn execute(command: Commands) -> anyhow::Result<()> {
    let env = EnvMap::from_process();
    let cwd = std::env::current_dir()?;

    match command {
        Commands::Run {
            flow_paths,
            platform,
            retries,
            include_tags,
            exclude_tags,
            shards,
            format,
            record_screen,
            output,
            config,
            results_json,
        } => {
            let config = match config {
                Some(path) => RunnerConfig::load(&path)?,
                None => RunnerConfig::default(),
            };

            println!("{} Running Maestro flows", "▶".green().bold());
            println!("  Platform: {}", platform.to_string().cyan());
            println!("  Retries: {}", retries.to_string().cyan());
            if !include_tags.is_empty() {
                println!("  Include tags: {}", include_tags.join(", ").yellow());
            }
            if !exclude_tags.is_empty() {
                println!("  Exclude tags: {}", exclude_tags.join(", ").yellow());
            }
            println!("  Output: {}", output.display().to_string().cyan());
            if record_screen {
                println!("  Recording: {}", "Enabled".green());
            }

            let cancel = Cancellation::new();
            let handler_cancel = cancel.clone();
            ctrlc::set_handler(move || {
                eprintln!("\n{} Cancelling, cleaning up devices...", "⏹".yellow());
                handler_cancel.cancel();
            })?;

            let mut options = RunOptions::new(platform, flow_paths, output);
            options.retries = retries;
            options.include_tags = include_tags;
            options.exclude_tags = exclude_tags;
            options.shards = shards;
            options.output_format = format;
            options.record_screen = record_screen;
            options.working_dir = cwd.clone();

            let export = match results_json {
                Some(output) => Some(ResultsExport {
                    output,
                    tests_dir: report::default_tests_dir()
                        .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?,
                    project_root: cwd,
                }),
                None => None,
            };

            let summary = runner::run_tests(options, &config, &env, cancel, export).await?;
            if let Some(dir) = &summary.junit_report_directory {
                println!("junit_report_directory={}", dir.display());
            }
        }

        Commands::Discover {
            flow_paths,
            include_tags,
            exclude_tags,
        } => {
            let flows = maestro_runner::parser::discover_all(
                &cwd,
                &flow_paths,
                &include_tags,
                &exclude_tags,
            )?;
            if flows.is_empty() {
                println!("{} No flows selected", "⚠".yellow());
            }
            for flow in flows {
                println!("{}", flow.display());
            }
        }

        Commands::Report {
            junit_dir,
            tests_dir,
            project_root,
            output,
        } => {
            let tests_dir = match tests_dir {
                Some(dir) => dir,
                None => report::default_tests_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?,
            };
            let project_root = project_root.unwrap_or(cwd);

            eprintln!(
                "{} Aggregating results from: {}",
                "📊".to_string().blue(),
                junit_dir.display()
            );
            let reporter = JsonFileReporter::new(output);
            let count =
                report::report_results(&junit_dir, &tests_dir, &project_root, &reporter).await?;
            eprintln!("{} {} flow result(s)", "✓".green(), count);
        }

        Commands::Devices { platform } => {
            println!(
                "{} Listing {} devices...",
                "🔍".to_string().blue(),
                platform.to_string().cyan()
            );
            driver::list_devices(platform, &env).await?;
        }
    }

    Ok(())
}

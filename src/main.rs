//! cronlet - a local cron-style job runner.
//!
//! Usage:
//!   cronlet run <config>              Dispatch every job due now
//!   cronlet exec <config> <job>       Run one job to completion
//!   cronlet validate <config>         Check a configuration file
//!   cronlet list <config>             List the configured jobs
//!
//! `run` is meant to be invoked once a minute from crontab:
//!
//! ```text
//! * * * * * cd /srv/app && cronlet run jobs.yaml
//! ```

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cronlet::{
    DetachedLauncher, Dispatcher, JobAction, RunOutcome, YamlLoader, load_dispatcher_from_file,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// cronlet - a local cron-style job runner
#[derive(Parser)]
#[command(name = "cronlet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch every job that is due now
    Run {
        /// Path to the YAML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Run due jobs inside this process and wait for them
        #[arg(long)]
        foreground: bool,
    },

    /// Run a single job to completion
    Exec {
        /// Path to the YAML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Name of the job to run
        #[arg(value_name = "JOB")]
        job: String,

        /// Reference instant (RFC 3339) the schedule is evaluated against
        #[arg(long)]
        at: Option<String>,
    },

    /// Validate a configuration file without running anything
    Validate {
        /// Path to the YAML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List all jobs in a configuration file
    List {
        /// Path to the YAML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, foreground } => {
            run_jobs(config, foreground).await?;
        }
        Commands::Exec { config, job, at } => {
            exec_job(config, job, at).await?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::List { config } => {
            list_jobs(config)?;
        }
    }

    Ok(())
}

/// One scheduling pass over the configured jobs.
async fn run_jobs(config: PathBuf, foreground: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut dispatcher = load_dispatcher_from_file(&config)?;

    if !foreground {
        let program = std::env::current_exe()?;
        let args = vec!["exec".to_string(), config.display().to_string()];
        dispatcher = dispatcher.with_subprocess(Arc::new(DetachedLauncher), program, args);
    }

    let report = dispatcher.run()?;
    if report.is_empty() {
        info!("No jobs due at {}", report.reference);
        return Ok(());
    }
    info!(
        "Dispatched {} job(s): {}",
        report.units.len(),
        report.job_names().join(", ")
    );

    if foreground {
        for (job, outcome) in report.wait().await {
            log_outcome(&job, &outcome);
        }
    }

    Ok(())
}

/// Run one job; the child side of a detached dispatch.
async fn exec_job(
    config: PathBuf,
    job: String,
    at: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = match at {
        Some(at) => DateTime::parse_from_rfc3339(&at)?.with_timezone(&Utc),
        None => Utc::now(),
    };

    let dispatcher = load_dispatcher_from_file(&config)?;
    let executor = match dispatcher.executor(&job) {
        Ok(executor) => executor,
        Err(e) => {
            error!("{}", e);
            error!("Available jobs: {}", job_names(&dispatcher).join(", "));
            return Err(e.into());
        }
    };

    let outcome = executor.run(reference).await;
    log_outcome(&job, &outcome);
    Ok(())
}

/// Validate a configuration file without running.
fn validate_config(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating: {}", config.display());

    let file = YamlLoader::load_file(&config)?;
    YamlLoader::check_schedules(&file)?;

    match load_dispatcher_from_file(&config) {
        Ok(dispatcher) => {
            let unresolved = dispatcher.unresolved_callables();
            info!("All {} job(s) are valid:", dispatcher.jobs().len());
            for job in dispatcher.jobs() {
                match unresolved.iter().find(|(name, _)| *name == job.name()) {
                    Some((_, id)) => warn!(
                        "  - {}: callable '{}' is not registered in this binary; \
                         run it from a program that registers it",
                        job.name(),
                        id
                    ),
                    None => info!("  - {}: OK", job.name()),
                }
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List all jobs in a configuration file.
fn list_jobs(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = load_dispatcher_from_file(&config)?;

    if dispatcher.jobs().is_empty() {
        println!("No jobs found in {}", config.display());
        return Ok(());
    }

    println!("Jobs in {}:", config.display());
    println!();

    for job in dispatcher.jobs() {
        println!("Name: {}", job.name());
        match job.action() {
            JobAction::Command(command) => println!("  Command: {}", command),
            JobAction::Callable(id) => println!("  Callable: {}", id),
        }
        println!("  Schedule: {}", job.schedule());
        println!("  Enabled: {}", job.is_enabled());
        if let Some(max) = job.max_runtime() {
            println!("  Max runtime: {}s", max.as_secs());
        }
        if let Some(host) = job.run_on_host() {
            println!("  Host: {}", host);
        }
        if let Some(output) = job.output() {
            println!("  Output: {}", output.display());
        }
        println!(
            "  Lock file: {}",
            job.lock_file(dispatcher.system().temp_dir()).display()
        );
        println!();
    }

    Ok(())
}

fn job_names(dispatcher: &Dispatcher) -> Vec<&str> {
    dispatcher.jobs().iter().map(|j| j.name()).collect()
}

fn log_outcome(job: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Skipped(reason) => info!("Job '{}' skipped: {:?}", job, reason),
        RunOutcome::LockBusy => info!("Job '{}' is still running elsewhere", job),
        RunOutcome::Aborted(e) => warn!("Job '{}' aborted: {}", job, e),
        RunOutcome::Executed(result) if result.success => {
            info!("Job '{}' completed successfully", job)
        }
        RunOutcome::Executed(result) => match &result.error {
            Some(e) => error!("Job '{}' failed: {}", job, e),
            None => error!("Job '{}' failed", job),
        },
    }
}

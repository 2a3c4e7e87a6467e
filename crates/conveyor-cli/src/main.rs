//! Conveyor CLI - run reader-to-writer data sync jobs

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use conveyor::{
    CancellationToken, Communicator, FAILED_EXIT_CODE, InProcessCommunicator, JobConfig,
    JobError, PluginRegistry, ProcessInnerScheduler, TaskGroupContainer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Reader-to-writer data synchronization", long_about = None)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (default: ~/.config/conveyor/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job file
    Run {
        /// Job file (YAML, TOML, or JSON)
        job: PathBuf,
    },

    /// Check a job file without running it
    Validate {
        /// Job file (YAML, TOML, or JSON)
        job: PathBuf,
    },

    /// List available reader and writer plugins
    Plugins,
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load_from_path(cli.config.clone().or_else(Config::default_path));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter(cli.verbose, cli.quiet))),
        )
        .init();

    let mut registry = PluginRegistry::new();
    conveyor_stream::register_all(&mut registry);

    let result = match cli.command {
        Commands::Run { job } => cmd_run(registry, &config, &job, cli.quiet),
        Commands::Validate { job } => cmd_validate(&registry, &job),
        Commands::Plugins => cmd_plugins(&registry),
    };

    if let Err(err) = result {
        std::process::exit(report_error(&err));
    }
}

/// Print the error chain and pick the exit code.
fn report_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<JobError>() {
        Some(job) => {
            eprintln!("Error {}: {:#}", job.kind(), err);
            job.exit_code()
        }
        None => {
            eprintln!("Error: {:#}", err);
            FAILED_EXIT_CODE
        }
    }
}

fn load_job(path: &Path) -> Result<JobConfig> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    let job = JobConfig::from_bytes(&data, path.to_str()).map_err(JobError::from)?;
    job.validate().map_err(JobError::from)?;
    Ok(job)
}

fn cmd_run(registry: PluginRegistry, config: &Config, path: &Path, quiet: bool) -> Result<()> {
    let mut job = load_job(path)?;
    if let Some(ms) = config.defaults.poll_interval_ms {
        job.poll_interval_ms = ms;
    }

    let communicator: Arc<dyn Communicator> = Arc::new(InProcessCommunicator::new());
    let mut scheduler = ProcessInnerScheduler::new(Arc::new(registry), communicator);
    let report = scheduler.run_job(job)?;

    if !quiet {
        let secs = report.elapsed.as_secs_f64();
        eprintln!(
            "Job {}: {} records, {} bytes in {:.2}s ({} errors)",
            report.state,
            report.stats.records_written,
            report.stats.bytes_written,
            secs,
            report.stats.error_count,
        );
    }
    Ok(())
}

fn cmd_validate(registry: &PluginRegistry, path: &Path) -> Result<()> {
    let job = load_job(path)?;

    // Resolve every plugin the way the scheduler will, without starting anything.
    let token = CancellationToken::new();
    let communicator: Arc<dyn Communicator> = Arc::new(InProcessCommunicator::new());
    for group in &job.task_groups {
        TaskGroupContainer::new(group.clone(), registry, Arc::clone(&communicator), &token)
            .map_err(JobError::from)?;
    }

    println!("Job: {}", path.display());
    println!(
        "Poll interval: {}ms",
        job.poll_interval().as_millis()
    );
    println!();
    for group in &job.task_groups {
        println!(
            "Task group {} ({} tasks, concurrency {}, error threshold {})",
            group.id,
            group.tasks.len(),
            group.effective_concurrency(),
            group.error_threshold
        );
        if group.max_task_retries > 0 {
            println!(
                "  retries: {} every {:?}",
                group.max_task_retries,
                group.retry_interval()
            );
        }
        for task in &group.tasks {
            println!(
                "  {}. {} -> {}",
                task.id, task.reader.name, task.writer.name
            );
        }
    }
    println!();
    println!(
        "Valid: {} task groups, {} tasks",
        job.task_groups.len(),
        job.task_count()
    );
    Ok(())
}

fn cmd_plugins(registry: &PluginRegistry) -> Result<()> {
    println!("Readers:\n");
    for factory in registry.readers() {
        println!("  {}", factory.name());
        if !factory.description().is_empty() {
            println!("    {}", factory.description());
        }
    }
    println!();
    println!("Writers:\n");
    for factory in registry.writers() {
        println!("  {}", factory.name());
        if !factory.description().is_empty() {
            println!("    {}", factory.description());
        }
    }
    println!();
    println!("Total: {} plugins", registry.len());
    Ok(())
}

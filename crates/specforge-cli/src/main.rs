//! SpecForge CLI
//!
//! The `specforge` command drives blueprint builds from the terminal.
//!
//! ## Commands
//!
//! - `build`: run a blueprint through the full pipeline
//! - `validate`: check a blueprint without generating anything
//! - `points`: list the extension points hooks can attach to
//! - `events`: replay a persisted event log

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use specforge_core::bus::EventBus;
use specforge_core::config::ForgeConfig;
use specforge_core::domain::Blueprint;
use specforge_core::extensions::{ExtensionPointInfo, ExtensionRegistry};
use specforge_core::scheduler::TaskScheduler;
use specforge_core::telemetry::{init_tracing, level_for};
use specforge_pipeline::{
    write_artifacts, BuildJob, BuildPipeline, BuildRequest, TemplateDocsProvider,
};
use specforge_state::{EventLog, FileEventLog};

#[derive(Parser)]
#[command(name = "specforge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate applications from structured blueprints", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "SPECFORGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a blueprint through the build pipeline
    Build {
        /// Blueprint JSON file
        #[arg(short, long)]
        spec: PathBuf,

        /// Deploy target; the deploying stage is skipped without one
        #[arg(long)]
        deploy_target: Option<String>,

        /// Tenant the job belongs to
        #[arg(long, env = "SPECFORGE_TENANT")]
        tenant: Option<String>,

        /// Write generated artifacts under this directory
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Append every event to this JSON-lines log
        #[arg(long, env = "SPECFORGE_EVENT_LOG")]
        event_log: Option<PathBuf>,

        /// Per-stage timeout override in milliseconds
        #[arg(long, env = "SPECFORGE_STAGE_TIMEOUT_MS")]
        stage_timeout_ms: Option<u64>,

        /// Skip the scheduled documentation task
        #[arg(long)]
        no_docs: bool,
    },

    /// Validate a blueprint without generating anything
    Validate {
        /// Blueprint JSON file
        #[arg(short, long)]
        spec: PathBuf,
    },

    /// List extension points
    Points,

    /// Replay events from a JSON-lines event log
    Events {
        /// Event log written by `build --event-log`
        #[arg(long)]
        event_log: PathBuf,

        /// First sequence number to replay
        #[arg(long, default_value_t = 1)]
        from: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json, level_for(cli.verbose));

    let config = ForgeConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Build {
            spec,
            deploy_target,
            tenant,
            out_dir,
            event_log,
            stage_timeout_ms,
            no_docs,
        } => {
            let mut config = config;
            if let Some(ms) = stage_timeout_ms {
                config.pipeline.stage_timeout_ms = Some(ms);
            }
            if no_docs {
                config.pipeline.ai_documentation = false;
            }
            config.validate()?;

            let args = BuildArgs {
                spec,
                deploy_target,
                tenant,
                out_dir,
                event_log,
            };
            let job = cmd_build(config, &args).await?;
            print_job(&job, cli.json)?;
            if !job.succeeded() {
                let code = job
                    .errors
                    .first()
                    .map(|e| e.code.as_str())
                    .unwrap_or("UNKNOWN");
                bail!("build {} failed in {} ({})", job.id, job.stage, code);
            }
            Ok(())
        }
        Commands::Validate { spec } => {
            let blueprint = cmd_validate(&spec)?;
            let summary = ValidateSummary {
                name: &blueprint.name,
                entities: blueprint.entities.len(),
                generatable: blueprint.generatable_entities().count(),
                spec_digest: blueprint.digest()?,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} is valid: {} entities ({} generatable)",
                    summary.name, summary.entities, summary.generatable
                );
                println!("Digest: {}", summary.spec_digest);
            }
            Ok(())
        }
        Commands::Points => {
            let points = cmd_points();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else {
                for info in points {
                    println!(
                        "{:<16} {:>12} -> {:<20} {}",
                        info.point.id,
                        info.point.input.to_string(),
                        info.point.output.to_string(),
                        info.point.description
                    );
                }
            }
            Ok(())
        }
        Commands::Events { event_log, from } => {
            let lines = cmd_events(&event_log, from).await?;
            for line in lines {
                println!("{line}");
            }
            Ok(())
        }
    }
}

struct BuildArgs {
    spec: PathBuf,
    deploy_target: Option<String>,
    tenant: Option<String>,
    out_dir: Option<PathBuf>,
    event_log: Option<PathBuf>,
}

#[derive(Serialize)]
struct ValidateSummary<'a> {
    name: &'a str,
    entities: usize,
    generatable: usize,
    spec_digest: String,
}

fn read_blueprint(path: &Path) -> Result<Blueprint> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read blueprint: {}", path.display()))?;
    Ok(Blueprint::from_json(&raw)?)
}

/// Parse and validate a blueprint file.
fn cmd_validate(path: &Path) -> Result<Blueprint> {
    let blueprint = read_blueprint(path)?;
    blueprint
        .validate()
        .with_context(|| format!("{} is not buildable", path.display()))?;
    Ok(blueprint)
}

fn cmd_points() -> Vec<ExtensionPointInfo> {
    ExtensionRegistry::new(None).extension_points()
}

/// Run one build end to end and optionally export its artifacts.
async fn cmd_build(config: ForgeConfig, args: &BuildArgs) -> Result<BuildJob> {
    let blueprint = read_blueprint(&args.spec)?;

    let bus = match &args.event_log {
        Some(path) => {
            let log = FileEventLog::open(path)
                .await
                .with_context(|| format!("Failed to open event log: {}", path.display()))?;
            EventBus::with_event_log(config.bus.history_capacity, Arc::new(log))
        }
        None => EventBus::new(config.bus.history_capacity),
    };
    let registry = Arc::new(ExtensionRegistry::new(Some(bus.clone())));

    let scheduler = Arc::new(TaskScheduler::new(config.scheduler.clone(), bus.clone()));
    scheduler.register_provider(
        TemplateDocsProvider::config(),
        Arc::new(TemplateDocsProvider),
    )?;
    scheduler.start();

    let pipeline = BuildPipeline::builder(bus, registry)
        .scheduler(scheduler.clone())
        .config(config.pipeline.clone())
        .build();

    let mut request = BuildRequest::new(blueprint);
    request.deploy_target = args.deploy_target.clone();
    request.tenant = args.tenant.clone();

    let job = pipeline.run(request).await;
    scheduler.flush_stats();
    scheduler.shutdown().await;
    let job = job?;

    if let Some(dir) = &args.out_dir {
        let bag = pipeline.artifacts(&job.id).await;
        let written = write_artifacts(dir, &bag)
            .with_context(|| format!("Failed to write artifacts to {}", dir.display()))?;
        info!(count = written.len(), dir = %dir.display(), "artifacts written");
    }
    Ok(job)
}

fn print_job(job: &BuildJob, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }
    println!("Job:      {}", job.id);
    println!("Digest:   {}", job.spec_digest);
    println!("Stage:    {} ({}%)", job.stage, job.progress);
    if let Some(receipt) = &job.deployment {
        println!("Deployed: {} ({})", receipt.target, receipt.deployment_id);
    }
    for error in &job.errors {
        println!("Error:    [{}] {}", error.code, error.message);
        println!("          {}", error.suggestion);
    }
    Ok(())
}

/// Render each logged event as `seq type job`.
async fn cmd_events(path: &Path, from: u64) -> Result<Vec<String>> {
    if !path.exists() {
        warn!(path = %path.display(), "event log does not exist");
        return Ok(Vec::new());
    }
    let log = FileEventLog::open(path)
        .await
        .with_context(|| format!("Failed to open event log: {}", path.display()))?;
    let entries = log.read_from(from, None).await?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let job = entry
                .payload
                .get("payload")
                .and_then(|p| p.get("data"))
                .and_then(|d| d.get("job_id"))
                .and_then(|j| j.as_str())
                .unwrap_or("-");
            format!("{:>6} {:<32} {}", entry.seq, entry.kind, job)
        })
        .collect())
}

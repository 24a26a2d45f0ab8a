//! orgclone: operator command-line tool for organization cloning.
//!
//! `plan` prints the dependency order of a catalog without connecting to
//! the database. `clone` copies every registered entity of one
//! organization into another and prints the per-type report.
//!
//! Exit codes: 0 fully succeeded, 2 partially succeeded, 1 aborted or
//! runtime error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use orgclone_core::catalog::CATALOG_NAMES;
use orgclone_core::{registry_by_name, CloneReport, EntityCloneStatus, SchemaRegistry};
use orgclone_db::{create_pool_with_config, log_pool_metrics, PgCloneStore, PoolConfig};
use orgclone_engine::{CancelSignal, CloneConfig, CloneOrchestrator, ClonePlan, CloneRequest};

const EXIT_PARTIAL: u8 = 2;

#[derive(Parser)]
#[command(name = "orgclone")]
#[command(author, version, about = "Clone one organization's entity graph into another")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the clone order for a catalog without touching the database
    Plan {
        /// Entity catalog to plan (commerce or site)
        #[arg(short, long, default_value = "commerce")]
        catalog: String,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clone all entities of the source organization into the target
    Clone {
        /// Organization to copy from
        #[arg(short, long)]
        source: Uuid,

        /// Organization to copy into (must already exist)
        #[arg(short, long)]
        target: Uuid,

        /// Entity catalog to clone (commerce or site)
        #[arg(short, long, default_value = "commerce")]
        catalog: String,

        /// Name of the new organization, written into site name fields
        #[arg(short, long)]
        name: Option<String>,

        /// Concurrent row inserts per entity type
        #[arg(long)]
        row_concurrency: Option<usize>,

        /// Concurrent entity types per dependency rank
        #[arg(long)]
        type_concurrency: Option<usize>,

        /// Table used to check that both organizations exist
        #[arg(long)]
        organization_table: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter (default: "orgclone=info")
///
/// Console logs go to stderr so stdout carries only the plan or report.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "orgclone=info,orgclone_engine=info,orgclone_db=info,orgclone_core=info".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("orgclone.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Plan { catalog, json } => {
            let plan = ClonePlan::for_registry(&load_catalog(&catalog)?)?;
            print_plan(&plan, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clone {
            source,
            target,
            catalog,
            name,
            row_concurrency,
            type_concurrency,
            organization_table,
            json,
        } => {
            let registry = load_catalog(&catalog)?;

            let mut config = CloneConfig::from_env();
            if let Some(n) = row_concurrency {
                config = config.with_row_concurrency(n);
            }
            if let Some(n) = type_concurrency {
                config = config.with_type_concurrency(n);
            }

            let database_url =
                std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
            let pool = create_pool_with_config(&database_url, PoolConfig::from_env()).await?;
            let mut store = PgCloneStore::new(pool.clone());
            if let Some(table) = organization_table {
                store = store.with_organization_table(table);
            }
            let store = Arc::new(store);

            let orchestrator = CloneOrchestrator::new(Arc::new(registry), store.clone(), store)
                .with_config(config);

            let (handle, signal) = CancelSignal::pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(
                        subsystem = "cli",
                        component = "orgclone",
                        "Interrupt received, cancelling clone job"
                    );
                    handle.cancel();
                }
            });

            info!(
                subsystem = "cli",
                component = "orgclone",
                op = "clone",
                source_org = %source,
                target_org = %target,
                catalog = %catalog,
                "Starting clone"
            );
            let mut request = CloneRequest::new(source, target).with_cancel(signal);
            if let Some(name) = name {
                request = request.with_target_name(name);
            }
            let report = orchestrator.execute(request).await?;
            log_pool_metrics(&pool);

            print_report(&report, json)?;
            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL)
            })
        }
    }
}

fn load_catalog(name: &str) -> anyhow::Result<SchemaRegistry> {
    let registry = registry_by_name(name).ok_or_else(|| {
        anyhow!(
            "unknown catalog '{}' (expected one of: {})",
            name,
            CATALOG_NAMES.join(", ")
        )
    })??;
    Ok(registry)
}

fn print_plan(plan: &ClonePlan, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    for (position, entry) in plan.entity_types.iter().enumerate() {
        println!("{:>3}. [rank {}] {}", position + 1, entry.rank, entry.name);
        if !entry.hard_dependencies.is_empty() {
            println!("       after: {}", entry.hard_dependencies.join(", "));
        }
        for soft in &entry.soft_references {
            println!("       soft:  {}", soft);
        }
    }
    if !plan.reference_only.is_empty() {
        println!("reference only: {}", plan.reference_only.join(", "));
    }
    Ok(())
}

fn status_label(status: &EntityCloneStatus) -> String {
    match status {
        EntityCloneStatus::Completed => "completed".to_string(),
        EntityCloneStatus::PartiallyCompleted => "partial".to_string(),
        EntityCloneStatus::Failed => "failed".to_string(),
        EntityCloneStatus::SkippedDueToDependencyFailure { blocked_by } => {
            format!("skipped ({})", blocked_by)
        }
        EntityCloneStatus::Cancelled => "cancelled".to_string(),
    }
}

fn print_report(report: &CloneReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{:<34} {:<26} {:>7} {:>8} {:>6} {:>8}",
        "entity type", "status", "source", "inserted", "failed", "repaired"
    );
    for result in &report.results {
        println!(
            "{:<34} {:<26} {:>7} {:>8} {:>6} {:>8}",
            result.type_name,
            status_label(&result.status),
            result.source_row_count,
            result.inserted_count,
            result.failed_rows.len(),
            result.repaired_references.len()
        );
        if let Some(error) = &result.error {
            println!("    error: {}", error);
        }
        for failure in &result.failed_rows {
            let id = failure
                .source_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "?".to_string());
            println!("    row {} [{}]: {}", id, failure.kind, failure.reason);
        }
    }

    println!();
    println!("job:          {}", report.job_id);
    println!("organization: {}", report.new_organization_id);
    println!(
        "outcome:      {:?}{}",
        report.outcome(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

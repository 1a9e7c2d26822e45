use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};

use contractflow::config::load_config;
use contractflow::db::job_repo::JobFilter;
use contractflow::db::{self, Database};
use contractflow::telemetry;
use contractflow::worker::{JobInput, JobStatus, ProcessingMode, ProcessingResult, WorkerPool};
use contractflow::{Config, Pipeline, SqliteStore};

#[derive(Parser)]
#[command(name = "contractflow")]
#[command(about = "Contract document processing with model routing")]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "CONTRACTFLOW_CONFIG", default_value = "contractflow.json")]
    config: PathBuf,

    /// Override the database path from the configuration
    #[arg(long, env = "CONTRACTFLOW_DATABASE")]
    database: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one or more documents
    Process {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// auto, fast or deep
        #[arg(short, long, default_value = "auto")]
        mode: ProcessingMode,

        /// Model id or alias that overrides routing
        #[arg(long)]
        force_model: Option<String>,
    },
    /// List jobs as JSON lines, newest first
    Jobs {
        /// running, succeeded or failed
        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long)]
        document: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: u64,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Print job counts per status instead
        #[arg(long)]
        summary: bool,
    },
    /// Print the stage log of a job as JSON lines
    Stages { job_id: String },
    /// List open quality issues
    Issues {
        /// Mark this issue resolved instead of listing
        #[arg(long)]
        resolve: Option<i64>,
    },
    /// Create or upgrade the database schema
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.json).context("Failed to initialize logging")?;

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let db = open_database(&config, cli.database.as_deref())?;

    match cli.command {
        Command::Process {
            files,
            mode,
            force_model,
        } => process(&config, db, files, mode, force_model).await,
        Command::Jobs {
            status,
            document,
            limit,
            offset,
            summary,
        } => {
            let store = SqliteStore::new(db);
            if summary {
                job_summary(&store)
            } else {
                let filter = JobFilter {
                    status: status.map(|s| s.as_str().to_string()),
                    document_id: document,
                    limit: Some(limit),
                    offset: Some(offset),
                };
                jobs(&store, &filter)
            }
        }
        Command::Stages { job_id } => stages(&SqliteStore::new(db), &job_id),
        Command::Issues { resolve } => issues(&SqliteStore::new(db), resolve),
        Command::Migrate => {
            let version = db.schema_version()?;
            info!(version, "Database schema is up to date");
            Ok(())
        }
    }
}

fn open_database(config: &Config, overridden: Option<&Path>) -> anyhow::Result<Database> {
    let path = match overridden {
        Some(path) => path.to_path_buf(),
        None => match &config.database_path {
            Some(path) => PathBuf::from(path),
            None => db::default_database_path().context("Cannot determine a home directory")?,
        },
    };
    Database::open(&path).with_context(|| format!("Failed to open database {}", path.display()))
}

async fn process(
    config: &Config,
    db: Database,
    files: Vec<PathBuf>,
    mode: ProcessingMode,
    force_model: Option<String>,
) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config, db)?);
    let mut pool = WorkerPool::new(pipeline, config.worker_count.min(files.len()));

    let shutdown = pool.shutdown_token();
    ctrlc::set_handler(move || {
        warn!("Interrupted, cancelling running jobs");
        shutdown.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut submitted = 0;
    for file in &files {
        let bytes = match std::fs::read(file) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                continue;
            }
        };
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        let mut input = JobInput::new(file.display().to_string(), filename, bytes).with_mode(mode);
        if let Some(model) = &force_model {
            input = input.with_forced_model(model.clone());
        }
        pool.submit(input).await?;
        submitted += 1;
    }

    let mut failed = 0;
    for _ in 0..submitted {
        let Some(result) = pool.recv_result().await else {
            break;
        };
        if !result.success {
            failed += 1;
        }
        println!("{}", result_json(&result));
    }
    pool.shutdown();
    pool.wait().await;

    if failed > 0 {
        bail!("{} of {} documents failed", failed, submitted);
    }
    Ok(())
}

fn result_json(result: &ProcessingResult) -> Value {
    json!({
        "job_id": result.job_id,
        "success": result.success,
        "record_id": result.record_id,
        "duration_ms": result.duration.as_millis() as u64,
        "error": result.error,
        "stages": result.stage_names(),
        "issues": result.issues,
    })
}

fn jobs(store: &SqliteStore, filter: &JobFilter) -> anyhow::Result<()> {
    let (rows, total) = store.list_jobs(filter)?;
    for row in &rows {
        println!(
            "{}",
            json!({
                "id": row.id,
                "document_id": row.document_id,
                "filename": row.filename,
                "format": row.format,
                "mode": row.mode,
                "status": row.status,
                "model": row.model,
                "record_id": row.record_id,
                "error": row.error,
                "created_at": row.created_at,
                "completed_at": row.completed_at,
            })
        );
    }
    info!(shown = rows.len(), total, "Jobs listed");
    Ok(())
}

fn job_summary(store: &SqliteStore) -> anyhow::Result<()> {
    let counts: serde_json::Map<String, Value> = store
        .status_counts()?
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), json!(count)))
        .collect();
    println!("{}", Value::Object(counts));
    Ok(())
}

fn stages(store: &SqliteStore, job_id: &str) -> anyhow::Result<()> {
    if store.find_job(job_id)?.is_none() {
        bail!("No job with id {}", job_id);
    }
    for row in store.stage_log(job_id)? {
        let output: Value = serde_json::from_str(&row.output_data).unwrap_or(Value::Null);
        println!(
            "{}",
            json!({
                "job_id": row.job_id,
                "stage": row.stage,
                "status": row.status,
                "output_data": output,
                "error_message": row.error_message,
                "duration_ms": row.duration_ms,
                "tokens_used": row.tokens_used,
                "cost_usd": row.cost_usd,
                "created_at": row.created_at,
            })
        );
    }
    Ok(())
}

fn issues(store: &SqliteStore, resolve: Option<i64>) -> anyhow::Result<()> {
    if let Some(id) = resolve {
        if !store.resolve_issue(id)? {
            bail!("No open issue with id {}", id);
        }
        info!(issue_id = id, "Issue resolved");
        return Ok(());
    }

    for row in store.open_issues()? {
        println!(
            "{}",
            json!({
                "id": row.id,
                "job_id": row.job_id,
                "issue_type": row.issue_type,
                "severity": row.severity,
                "description": row.description,
                "requires_manual_review": row.requires_manual_review,
                "status": row.status,
                "created_at": row.created_at,
            })
        );
    }
    Ok(())
}

//! # rowvault CLI
//!
//! Run a sampling job over a JSON snapshot without standing up a service:
//!
//! ```text
//! rowvault check-filter --schema people.schema.json "age >= 18 AND region IN ('north', 'south')"
//! rowvault sample --dataset people.json --job job.json [--config rowvault.json] [--data-dir ./data]
//! ```
//!
//! The snapshot file holds `{ "name", "table_key", "schema", "rows" }`; rows are
//! plain JSON objects. The job file is a `SamplingParameters` document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, Level};

use rowvault_api::{
    AllowAll, CommitRequest, InMemoryJobQueue, Orchestrator, OutputTable, Repository,
    SamplingJobRequest, SamplingParameters,
};
use rowvault_core::config::{Config, LogFormat, LogLevel, LoggingConfig};
use rowvault_core::utils::format_bytes;
use rowvault_core::value::row_to_json;
use rowvault_core::{JobStatus, LogicalRowId, Manifest, ManifestDelta, Schema};
use rowvault_sampling::parse_filter;

const CLI_USER: &str = "cli";

#[derive(Parser)]
#[command(name = "rowvault")]
#[command(about = "Versioned tabular store with reproducible sampling jobs")]
struct Cli {
    /// JSON config file; missing sections use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a filter expression and type-check it against a schema
    CheckFilter {
        #[arg(long)]
        schema: PathBuf,
        expression: String,
    },
    /// Import a snapshot on `main` and run one sampling job over it
    Sample {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long)]
        job: PathBuf,
        /// Persist row objects here instead of keeping them in memory
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Print up to this many sampled rows after the summary
        #[arg(long, default_value_t = 0)]
        show_rows: u64,
    },
}

#[derive(Deserialize)]
struct Snapshot {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_table_key")]
    table_key: String,
    schema: Schema,
    rows: Vec<serde_json::Value>,
}

fn default_name() -> String {
    "snapshot".to_string()
}

fn default_table_key() -> String {
    "data".to_string()
}

fn init_logging(config: &LoggingConfig) {
    let level = match config.level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    match config.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::CheckFilter { schema, expression } => check_filter(&config, &schema, &expression),
        Commands::Sample {
            dataset,
            job,
            data_dir,
            show_rows,
        } => sample(config, &dataset, &job, data_dir, show_rows).await,
    }
}

fn check_filter(config: &Config, schema_path: &Path, expression: &str) -> Result<()> {
    let schema: Schema = read_json(schema_path)?;
    let expr = parse_filter(expression, &config.filter)?;
    expr.compile(&schema, &config.filter)?;
    println!("{}", serde_json::to_string_pretty(&expr)?);
    Ok(())
}

async fn sample(
    mut config: Config,
    snapshot_path: &Path,
    job_path: &Path,
    data_dir: Option<PathBuf>,
    show_rows: u64,
) -> Result<()> {
    let snapshot: Snapshot = read_json(snapshot_path)?;
    let parameters: SamplingParameters = read_json(job_path)?;

    let repo = match data_dir {
        Some(dir) => {
            config.storage.data_dir = dir;
            Arc::new(Repository::open(&config.storage).await?)
        }
        None => Arc::new(Repository::in_memory()),
    };

    let rows = snapshot
        .rows
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            snapshot
                .schema
                .row_from_json(raw)
                .with_context(|| format!("snapshot row {}", i))
        })
        .collect::<Result<Vec<_>>>()?;

    let dataset = repo.create_dataset(&snapshot.name, CLI_USER)?;
    let hashes = repo.put_rows(&snapshot.schema, rows).await?;
    let manifest: Manifest = hashes
        .into_iter()
        .enumerate()
        .map(|(i, hash)| (LogicalRowId::new(snapshot.table_key.clone(), i as u64), hash))
        .collect();
    let import = repo
        .commit(
            CommitRequest::on_branch(
                dataset.id,
                "main",
                None,
                ManifestDelta::Replace(manifest),
                format!("import {}", snapshot_path.display()),
                CLI_USER,
            )
            .with_schemas(BTreeMap::from([(snapshot.table_key.clone(), snapshot.schema.clone())])),
        )
        .await?;
    let stats = repo.row_store().stats().await?;
    info!(
        dataset = %snapshot.name,
        commit = %import.commit_id.short(),
        rows = stats.row_count,
        size = %format_bytes(stats.total_bytes),
        "Snapshot imported"
    );

    let orchestrator = Orchestrator::new(
        repo,
        Arc::new(InMemoryJobQueue::new()),
        Arc::new(AllowAll),
        config,
    );
    let job_id = orchestrator
        .create_sampling_job(SamplingJobRequest {
            dataset_id: dataset.id,
            source_ref: "main".into(),
            requested_by: CLI_USER.into(),
            parameters,
        })
        .await?;
    orchestrator.run_next().await?;

    let job = orchestrator.get_job(CLI_USER, job_id).await?;
    if job.status != JobStatus::Completed {
        bail!(
            "job {} {}: {}",
            job_id,
            job.status,
            job.error.as_deref().unwrap_or("no error recorded")
        );
    }
    println!("{}", serde_json::to_string_pretty(&job.output_summary)?);

    if show_rows > 0 {
        let page = orchestrator
            .get_job_output(CLI_USER, job_id, OutputTable::Sample, 0, show_rows, None)
            .await?;
        for row in page.rows {
            println!("{}\t{}", row.id, row_to_json(&row.data));
        }
    }
    Ok(())
}

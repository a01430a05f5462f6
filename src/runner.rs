//! High-level runner API for the dump loader.
//!
//! This module hides the setup of adapters, dump sources, bootstrap scripts
//! and progress output behind a single call. It is the entry point used by
//! the CLI.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_ENCODING, DEFAULT_MAX_STATEMENT_BYTES, DEFAULT_QUEUE_DEPTH,
    DEFAULT_RECORD_IDENTIFIER, DEFAULT_ROW_MEMORY_LIMIT, PROGRESS_REFRESH_INTERVAL,
};
use crate::db::{AdapterRegistry, SchemaBootstrapper, ScriptSet, SqlxConnector};
use crate::engine::{EngineConfig, EngineConfigBuilder, LoadEngine, LoadSummary, MalformedPolicy, PipelineConfig};
use crate::error::LoadError;
use crate::io::{DumpSource, Encoding};
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// Arguments for running a dump load
#[derive(Debug, Clone)]
pub struct LoadArgs {
    // Source
    pub dump_file_path: PathBuf,
    pub encoding: String,

    // Destination
    pub database: String,
    pub url: String,
    pub identifier_escape_char: Option<char>,
    pub parameter_conversion_enabled: Option<bool>,

    // Parsing
    pub record_identifier: String,
    pub one_insert_per_row: bool,
    pub process_ddl_scripts: bool,
    pub backslash_escapes: bool,
    pub max_statement_bytes: usize,
    pub skip_malformed: bool,

    // Batching
    pub batch_size: usize,
    pub row_memory_limit: usize,

    // Schema bootstrap
    pub tables: Option<String>,
    pub scripts_dir: Option<PathBuf>,

    // Pipelined writes
    pub pipelined: bool,
    pub writers: usize,
    pub queue_depth: usize,

    // Output
    pub quiet: bool,
    pub report_path: Option<PathBuf>,
}

impl LoadArgs {
    /// Arguments with every tunable at its default
    pub fn new(
        dump_file_path: impl Into<PathBuf>,
        database: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            dump_file_path: dump_file_path.into(),
            encoding: DEFAULT_ENCODING.to_string(),
            database: database.into(),
            url: url.into(),
            identifier_escape_char: None,
            parameter_conversion_enabled: None,
            record_identifier: DEFAULT_RECORD_IDENTIFIER.to_string(),
            one_insert_per_row: false,
            process_ddl_scripts: false,
            backslash_escapes: true,
            max_statement_bytes: DEFAULT_MAX_STATEMENT_BYTES,
            skip_malformed: false,
            batch_size: DEFAULT_BATCH_SIZE,
            row_memory_limit: DEFAULT_ROW_MEMORY_LIMIT,
            tables: None,
            scripts_dir: None,
            pipelined: false,
            writers: 1,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            quiet: true,
            report_path: None,
        }
    }

    fn pipeline(&self) -> Option<PipelineConfig> {
        (self.pipelined || self.writers > 1).then_some(PipelineConfig {
            writers: self.writers,
            queue_depth: self.queue_depth,
        })
    }
}

/// Outcome of a load run, written as JSON when a report path is given
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: String,
    pub database: String,
    pub dump_file: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub summary: Option<LoadSummary>,
    pub error: Option<String>,
}

/// Run a dump load with the specified arguments
///
/// Resolves the adapter, opens the dump, loads bootstrap scripts when tables
/// are listed, and drives a [`LoadEngine`] to completion. On failure the
/// report is still written before the first fatal error is returned.
///
/// # Example
///
/// ```no_run
/// use sql_dump_loader::runner::{LoadArgs, run_load};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut args = LoadArgs::new("world.sql", "postgres", "postgres://localhost/world");
/// args.batch_size = 5000;
/// args.tables = Some("cities,countries".to_string());
/// args.scripts_dir = Some("schema/".into());
///
/// let report = run_load(args, CancellationToken::new()).await?;
/// println!("Loaded {:?} in {:.2}s", report.summary, report.duration_secs);
/// # Ok(())
/// # }
/// ```
pub async fn run_load(args: LoadArgs, cancel: CancellationToken) -> Result<LoadReport> {
    let started_at = Utc::now();
    let start_time = Instant::now();
    let run_id = Uuid::new_v4().to_string();
    info!("Starting load run: {}", run_id);

    // Resolve the adapter and apply overrides
    let registry = AdapterRegistry::with_defaults();
    let mut adapter = registry.resolve(&args.database)?;
    if let Some(escape) = args.identifier_escape_char {
        adapter = adapter.with_identifier_escape(escape);
    }
    if let Some(enabled) = args.parameter_conversion_enabled {
        adapter = adapter.with_parameter_conversion(enabled);
    }
    let connector = Arc::new(SqlxConnector::new(adapter, args.url.clone()));

    let config = build_engine_config(&args).await?;

    let encoding = Encoding::parse(&args.encoding)?;
    let source = DumpSource::open(&args.dump_file_path, encoding)
        .await
        .with_context(|| {
            format!(
                "Failed to open dump file {}",
                args.dump_file_path.display()
            )
        })?;
    let total_bytes = source.size_hint();

    // The engine holds the only sender so the channel closes when it is dropped
    let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
    let mut engine = LoadEngine::new(connector).with_telemetry(telemetry_tx);
    engine.configure(source, config)?;

    let prog_jh = setup_progress_tracking(args.quiet, total_bytes, telemetry_rx);

    let result = engine.run(cancel).await;
    let summary = engine.summary().cloned();
    drop(engine);

    // Wait for the progress bars to finish so output does not collide
    if let Some(jh) = prog_jh {
        let _ = jh.await;
    }

    let report = LoadReport {
        run_id,
        database: args.database.clone(),
        dump_file: args.dump_file_path.display().to_string(),
        started_at,
        finished_at: Utc::now(),
        duration_secs: start_time.elapsed().as_secs_f64(),
        summary,
        error: result.as_ref().err().map(|e| e.to_string()),
    };

    let written = match &args.report_path {
        Some(path) => write_report(&report, path).await,
        None => Ok(()),
    };

    match result {
        Ok(_) => {
            written?;
            Ok(report)
        }
        Err(e) => {
            if let Err(report_err) = written {
                warn!("Failed to write load report: {:#}", report_err);
            }
            Err(anyhow::Error::new(e).context(format!("Load run {} failed", report.run_id)))
        }
    }
}

async fn build_engine_config(args: &LoadArgs) -> Result<EngineConfig> {
    let mut builder = EngineConfigBuilder::default();
    builder
        .batch_size(args.batch_size)
        .row_memory_limit(args.row_memory_limit)
        .process_ddl(args.process_ddl_scripts)
        .record_identifier(args.record_identifier.as_str())
        .one_insert_per_row(args.one_insert_per_row)
        .backslash_escapes(args.backslash_escapes)
        .max_statement_bytes(args.max_statement_bytes)
        .malformed_policy(if args.skip_malformed {
            MalformedPolicy::Skip
        } else {
            MalformedPolicy::Abort
        });

    if let Some(pipeline) = args.pipeline() {
        builder.pipeline(pipeline);
    }

    if let Some(tables) = &args.tables {
        let Some(dir) = &args.scripts_dir else {
            return Err(LoadError::Configuration(
                "a scripts directory is required when tables are listed".to_string(),
            )
            .into());
        };
        let scripts = ScriptSet::load_dir(dir).await?;
        builder.bootstrap(SchemaBootstrapper::new(tables, scripts));
    }

    Ok(builder.build()?)
}

async fn write_report(report: &LoadReport, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("Failed to serialize load report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write load report to {}", path.display()))?;
    info!(path = %path.display(), "Wrote load report");
    Ok(())
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Setup progress tracking with progress bars
fn setup_progress_tracking(
    quiet: bool,
    total_bytes: Option<u64>,
    mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
) -> Option<tokio::task::JoinHandle<()>> {
    if quiet {
        return None;
    }

    let multi_progress = MultiProgress::new();

    let bytes_bar = multi_progress.add(ProgressBar::new(total_bytes.unwrap_or(0)));
    bytes_bar.set_style(bar_style(
        "[{elapsed_precise}] Dump:       [{bar:30.yellow/blue}] {bytes}/{total_bytes} ({percent}%) | {bytes_per_sec}",
    ));

    let rows_bar = multi_progress.add(ProgressBar::new(0));
    rows_bar.set_style(bar_style(
        "[{elapsed_precise}] Rows:       {human_pos} | {per_sec} | {msg}",
    ));

    let stats_bar = multi_progress.add(ProgressBar::new(0));
    stats_bar.set_style(bar_style("[{elapsed_precise}] Batch Time: {msg}"));

    Some(tokio::spawn(async move {
        let mut stats = ProgressStats::new();

        let mut refresh = tokio::time::interval(PROGRESS_REFRESH_INTERVAL);

        loop {
            tokio::select! {
                event = telemetry_rx.recv() => {
                    let Some(event) = event else { break };
                    stats.update(&event);

                    bytes_bar.set_position(stats.bytes_scanned);
                    rows_bar.set_position(stats.rows_written);
                    rows_bar.set_message(format!(
                        "{} batches, {} statements",
                        stats.batches_written, stats.statements_executed
                    ));
                }
                _ = refresh.tick() => {
                    let (p50, p90, p99) = stats.get_percentiles();
                    if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
                        stats_bar
                            .set_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
                    }
                }
            }
        }

        bytes_bar.finish();
        rows_bar.finish();

        let (p50, p90, p99) = stats.get_percentiles();
        if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
            stats_bar
                .finish_with_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
        } else {
            stats_bar.finish();
        }
    }))
}

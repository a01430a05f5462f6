use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use derive_builder::Builder;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::accumulator::{Batch, BatchAccumulator};
use super::worker::{WorkItem, Writer, WriterOutcome, WriterStats, write_batch_timed};
use crate::config::{
    CHUNK_SIZE, DEFAULT_BATCH_SIZE, DEFAULT_MAX_STATEMENT_BYTES, DEFAULT_RECORD_IDENTIFIER,
    DEFAULT_ROW_MEMORY_LIMIT,
};
use crate::db::{Connector, Destination, SchemaBootstrapper};
use crate::dump::{DumpParser, ParsedStatement, ParserOptions, RecordPattern};
use crate::error::LoadError;
use crate::io::DumpSource;
use crate::telemetry::{ScanProgress, TelemetryEvent};

/// Lifecycle of a load engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Created,
    Configured,
    Running,
    Completed,
    Failed,
    ShutDown,
}

/// What to do with a data statement that cannot be parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedPolicy {
    #[default]
    Abort,
    /// Log, count and continue with the next statement
    Skip,
}

/// Writer fan-out for pipelined mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub writers: usize,
    pub queue_depth: usize,
}

/// Options of one load run
#[derive(Debug, Clone, Builder)]
pub struct EngineConfig {
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
    #[builder(default = "DEFAULT_ROW_MEMORY_LIMIT")]
    pub row_memory_limit: usize,
    /// Forward non-data statements to the destination instead of skipping them
    #[builder(default = "false")]
    pub process_ddl: bool,
    #[builder(setter(into), default = "DEFAULT_RECORD_IDENTIFIER.to_string()")]
    pub record_identifier: String,
    #[builder(default = "false")]
    pub one_insert_per_row: bool,
    #[builder(default = "true")]
    pub backslash_escapes: bool,
    #[builder(default = "DEFAULT_MAX_STATEMENT_BYTES")]
    pub max_statement_bytes: usize,
    #[builder(default)]
    pub malformed_policy: MalformedPolicy,
    #[builder(setter(strip_option), default)]
    pub pipeline: Option<PipelineConfig>,
    #[builder(setter(strip_option), default)]
    pub bootstrap: Option<SchemaBootstrapper>,
}

impl EngineConfig {
    /// Check thresholds and compile the record pattern
    pub fn validate(&self) -> Result<RecordPattern, LoadError> {
        if self.batch_size < 1 {
            return Err(LoadError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.row_memory_limit < 1 {
            return Err(LoadError::Configuration(
                "row memory limit must be at least 1 byte".to_string(),
            ));
        }
        if self.max_statement_bytes < CHUNK_SIZE {
            return Err(LoadError::Configuration(format!(
                "maximum statement size must be at least {} bytes",
                CHUNK_SIZE
            )));
        }
        if let Some(pipeline) = &self.pipeline {
            if pipeline.writers < 1 {
                return Err(LoadError::Configuration(
                    "pipelined mode needs at least one writer".to_string(),
                ));
            }
            if pipeline.queue_depth < 1 {
                return Err(LoadError::Configuration(
                    "queue depth must be at least 1".to_string(),
                ));
            }
        }
        RecordPattern::new(&self.record_identifier, self.one_insert_per_row)
    }
}

/// Counters of one run
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LoadSummary {
    pub state: EngineState,
    pub rows_written: BTreeMap<String, u64>,
    pub total_rows: u64,
    pub batches_written: u64,
    pub raw_statements_executed: u64,
    pub ddl_statements_skipped: u64,
    pub malformed_statements_skipped: u64,
    pub tables_created: Vec<String>,
    pub bytes_read: u64,
}

impl LoadSummary {
    fn new() -> Self {
        Self {
            state: EngineState::Running,
            rows_written: BTreeMap::new(),
            total_rows: 0,
            batches_written: 0,
            raw_statements_executed: 0,
            ddl_statements_skipped: 0,
            malformed_statements_skipped: 0,
            tables_created: Vec::new(),
            bytes_read: 0,
        }
    }

    fn absorb(&mut self, stats: WriterStats) {
        self.total_rows += stats.total_rows();
        self.batches_written += stats.batches_written;
        self.raw_statements_executed += stats.raw_statements_executed;
        for (table, rows) in stats.rows_written {
            *self.rows_written.entry(table).or_default() += rows;
        }
    }
}

/// Drives parser → accumulator → destination for one dump
pub struct LoadEngine {
    state: EngineState,
    connector: Arc<dyn Connector>,
    source: Option<DumpSource>,
    config: Option<EngineConfig>,
    pattern: Option<RecordPattern>,
    telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    summary: Option<LoadSummary>,
}

impl LoadEngine {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            state: EngineState::Created,
            connector,
            source: None,
            config: None,
            pattern: None,
            telemetry_tx: None,
            summary: None,
        }
    }

    pub fn with_telemetry(mut self, tx: mpsc::UnboundedSender<TelemetryEvent>) -> Self {
        self.telemetry_tx = Some(tx);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Counters of the finished run, whether it succeeded or not
    pub fn summary(&self) -> Option<&LoadSummary> {
        self.summary.as_ref()
    }

    /// Attach the dump and validate options; no I/O happens here
    pub fn configure(&mut self, source: DumpSource, config: EngineConfig) -> Result<(), LoadError> {
        if self.state != EngineState::Created {
            return Err(LoadError::Configuration(format!(
                "engine cannot be configured in state {:?}",
                self.state
            )));
        }
        let pattern = config.validate()?;
        self.source = Some(source);
        self.config = Some(config);
        self.pattern = Some(pattern);
        self.state = EngineState::Configured;
        Ok(())
    }

    /// Run the load to completion; may be called once
    ///
    /// Every destination acquired is shut down before this returns, on success
    /// and on failure alike.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<LoadSummary, LoadError> {
        if self.state != EngineState::Configured {
            return Err(LoadError::Configuration(format!(
                "engine cannot run in state {:?}",
                self.state
            )));
        }
        let (Some(source), Some(config), Some(pattern)) =
            (self.source.take(), self.config.take(), self.pattern.take())
        else {
            return Err(LoadError::Configuration(
                "engine is missing its source or configuration".to_string(),
            ));
        };
        self.state = EngineState::Running;

        let mut summary = LoadSummary::new();
        let result = execute(
            self.connector.clone(),
            self.telemetry_tx.clone(),
            source,
            config,
            pattern,
            cancel,
            &mut summary,
        )
        .await;

        summary.state = if result.is_ok() {
            EngineState::Completed
        } else {
            EngineState::Failed
        };
        self.state = EngineState::ShutDown;
        self.summary = Some(summary.clone());

        match result {
            Ok(()) => {
                info!(
                    rows = summary.total_rows,
                    batches = summary.batches_written,
                    "Load completed"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!("Load failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Connect, optionally bootstrap, then stream the dump into the sink
async fn execute(
    connector: Arc<dyn Connector>,
    telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    source: DumpSource,
    config: EngineConfig,
    pattern: RecordPattern,
    cancel: CancellationToken,
    summary: &mut LoadSummary,
) -> Result<(), LoadError> {
    let mut primary = connector.connect().await?;

    if let Some(bootstrapper) = &config.bootstrap {
        match bootstrapper.bootstrap(primary.as_mut()).await {
            Ok(report) => summary.tables_created = report.tables_created,
            Err(e) => {
                if let Err(shutdown_err) = primary.shutdown().await {
                    warn!("Shutdown after failure also failed: {}", shutdown_err);
                }
                return Err(e);
            }
        }
    }

    let mut sink: Box<dyn BatchSink> = match config.pipeline {
        None => Box::new(DirectSink::new(primary, cancel.clone(), telemetry_tx.clone())),
        Some(pipeline) => Box::new(
            PipelinedSink::start(
                connector.as_ref(),
                primary,
                pipeline,
                cancel.clone(),
                telemetry_tx.clone(),
            )
            .await?,
        ),
    };

    let parser = DumpParser::new(
        source,
        pattern,
        ParserOptions {
            process_ddl: config.process_ddl,
            backslash_escapes: config.backslash_escapes,
            max_statement_bytes: config.max_statement_bytes,
        },
    );
    let accumulator = BatchAccumulator::new(config.batch_size, config.row_memory_limit);

    let mut driver = Driver {
        parser,
        accumulator,
        policy: config.malformed_policy,
        cancel,
        telemetry_tx,
        progress: ScanProgress::new(CHUNK_SIZE as u64),
    };
    let driven = driver.drive(sink.as_mut(), summary).await;
    let finished = sink.finish().await;
    summary.absorb(sink.take_stats());
    summary.ddl_statements_skipped = driver.parser.skipped_statements();
    summary.bytes_read = driver.parser.bytes_read();
    if summary.ddl_statements_skipped > 0 {
        info!(
            statements = summary.ddl_statements_skipped,
            "Skipped non-data statements"
        );
    }

    match (driven, finished) {
        (Ok(()), finished) => finished,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(shutdown_err)) => {
            warn!("Shutdown after failure also failed: {}", shutdown_err);
            Err(e)
        }
    }
}

/// The parse loop shared by both write modes
struct Driver {
    parser: DumpParser,
    accumulator: BatchAccumulator,
    policy: MalformedPolicy,
    cancel: CancellationToken,
    telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    /// At most one `BytesScanned` per chunk of input, however many statements it holds
    progress: ScanProgress,
}

impl Driver {
    async fn drive(
        &mut self,
        sink: &mut dyn BatchSink,
        summary: &mut LoadSummary,
    ) -> Result<(), LoadError> {
        loop {
            if self.cancel.is_cancelled() {
                info!(
                    buffered_rows = self.accumulator.buffered_rows(),
                    "Load cancelled, discarding buffered rows"
                );
                return Err(LoadError::Cancelled);
            }

            let statement = match self.parser.next_statement().await {
                Ok(Some(statement)) => statement,
                Ok(None) => break,
                Err(e) if e.is_recoverable() && self.policy == MalformedPolicy::Skip => {
                    warn!("Skipping statement: {}", e);
                    summary.malformed_statements_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match statement {
                ParsedStatement::Rows(group) => {
                    for batch in self.accumulator.push(group) {
                        sink.write(batch).await?;
                    }
                }
                ParsedStatement::Raw { offset, sql } => {
                    for batch in self.accumulator.flush_all() {
                        sink.write(batch).await?;
                    }
                    debug!(offset, "Executing raw statement");
                    sink.execute(sql).await.map_err(|e| e.at_offset(offset))?;
                }
            }

            let scanned = self.progress.advance(self.parser.bytes_read());
            self.report(scanned);
        }

        let scanned = self.progress.finish(self.parser.bytes_read());
        self.report(scanned);
        for batch in self.accumulator.drain() {
            sink.write(batch).await?;
        }
        Ok(())
    }

    fn report(&self, event: Option<TelemetryEvent>) {
        if let (Some(tx), Some(event)) = (&self.telemetry_tx, event) {
            let _ = tx.send(event);
        }
    }
}

/// Where the driver sends batches and raw statements
#[async_trait]
trait BatchSink: Send {
    async fn write(&mut self, batch: Batch) -> Result<(), LoadError>;

    async fn execute(&mut self, sql: String) -> Result<(), LoadError>;

    /// Wait for outstanding work and shut every destination down
    async fn finish(&mut self) -> Result<(), LoadError>;

    fn take_stats(&mut self) -> WriterStats;
}

/// Writes on the engine's own task, one batch at a time
struct DirectSink {
    destination: Option<Box<dyn Destination>>,
    cancel: CancellationToken,
    telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    stats: WriterStats,
}

impl DirectSink {
    fn new(
        destination: Box<dyn Destination>,
        cancel: CancellationToken,
        telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    ) -> Self {
        Self {
            destination: Some(destination),
            cancel,
            telemetry_tx,
            stats: WriterStats::default(),
        }
    }

    fn destination(&mut self) -> Result<&mut Box<dyn Destination>, LoadError> {
        self.destination
            .as_mut()
            .ok_or_else(|| LoadError::Connection("destination already shut down".to_string()))
    }
}

#[async_trait]
impl BatchSink for DirectSink {
    async fn write(&mut self, batch: Batch) -> Result<(), LoadError> {
        if self.cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let telemetry_tx = self.telemetry_tx.clone();
        let destination = self.destination()?;
        write_batch_timed(destination.as_mut(), &batch, telemetry_tx.as_ref()).await?;
        self.stats.record_batch(&batch);
        Ok(())
    }

    async fn execute(&mut self, sql: String) -> Result<(), LoadError> {
        self.destination()?.execute(&sql).await?;
        self.stats.raw_statements_executed += 1;
        if let Some(tx) = &self.telemetry_tx {
            let _ = tx.send(TelemetryEvent::StatementExecuted);
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), LoadError> {
        match self.destination.take() {
            Some(destination) => destination.shutdown().await,
            None => Ok(()),
        }
    }

    fn take_stats(&mut self) -> WriterStats {
        std::mem::take(&mut self.stats)
    }
}

/// Fans batches out to writer tasks, keeping each table on one writer
struct PipelinedSink {
    queues: Vec<mpsc::Sender<WorkItem>>,
    handles: Vec<JoinHandle<WriterOutcome>>,
    assignment: HashMap<String, usize>,
    next_writer: usize,
    stats: WriterStats,
    /// Cancelled by the first writer that fails
    failed: CancellationToken,
    /// First failure collected from the writers
    failure: Option<LoadError>,
}

impl PipelinedSink {
    /// Spawn the writers; `primary` goes to writer 0
    async fn start(
        connector: &dyn Connector,
        primary: Box<dyn Destination>,
        pipeline: PipelineConfig,
        cancel: CancellationToken,
        telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    ) -> Result<Self, LoadError> {
        let mut destinations = vec![primary];
        for _ in 1..pipeline.writers {
            match connector.connect().await {
                Ok(destination) => destinations.push(destination),
                Err(e) => {
                    for destination in destinations {
                        if let Err(shutdown_err) = destination.shutdown().await {
                            warn!("Shutdown after failure also failed: {}", shutdown_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        let failed = CancellationToken::new();
        let mut queues = Vec::with_capacity(destinations.len());
        let mut handles = Vec::with_capacity(destinations.len());
        for (writer_id, destination) in destinations.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(pipeline.queue_depth);
            let writer = Writer {
                writer_id,
                destination,
                cancel: cancel.clone(),
                failed: failed.clone(),
                telemetry_tx: telemetry_tx.clone(),
            };
            queues.push(tx);
            handles.push(tokio::spawn(writer.run(rx)));
        }
        info!(writers = queues.len(), "Started pipelined writers");

        Ok(Self {
            queues,
            handles,
            assignment: HashMap::new(),
            next_writer: 0,
            stats: WriterStats::default(),
            failed,
            failure: None,
        })
    }

    fn writer_for(&mut self, table: &str) -> usize {
        if let Some(writer) = self.assignment.get(table) {
            return *writer;
        }
        let writer = self.next_writer;
        self.next_writer = (self.next_writer + 1) % self.queues.len();
        self.assignment.insert(table.to_string(), writer);
        debug!(table, writer, "Assigned table to writer");
        writer
    }

    /// A writer went away: stop everything and report why
    async fn writer_failure(&mut self) -> LoadError {
        if let Err(e) = self.finish().await {
            return e;
        }
        LoadError::Connection("writer stopped unexpectedly".to_string())
    }

    /// Stop the driver as soon as any writer has failed, not only the one being fed
    async fn check_writers(&mut self) -> Result<(), LoadError> {
        if self.failed.is_cancelled() {
            return Err(self.writer_failure().await);
        }
        Ok(())
    }

    async fn send(&mut self, writer: usize, item: WorkItem) -> Result<(), LoadError> {
        let Some(queue) = self.queues.get(writer) else {
            return Err(self.writer_failure().await);
        };
        if queue.send(item).await.is_err() {
            return Err(self.writer_failure().await);
        }
        Ok(())
    }
}

#[async_trait]
impl BatchSink for PipelinedSink {
    async fn write(&mut self, batch: Batch) -> Result<(), LoadError> {
        self.check_writers().await?;
        let writer = self.writer_for(&batch.table);
        self.send(writer, WorkItem::Batch(batch)).await
    }

    async fn execute(&mut self, sql: String) -> Result<(), LoadError> {
        self.check_writers().await?;
        // Every writer drains its queue before the statement runs
        for writer in 1..self.queues.len() {
            let (done_tx, done_rx) = oneshot::channel();
            self.send(writer, WorkItem::Barrier(done_tx)).await?;
            if done_rx.await.is_err() {
                return Err(self.writer_failure().await);
            }
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(0, WorkItem::Execute { sql, ack: ack_tx }).await?;
        match ack_rx.await {
            Ok(true) => Ok(()),
            _ => Err(self.writer_failure().await),
        }
    }

    async fn finish(&mut self) -> Result<(), LoadError> {
        self.queues.clear();
        let outcomes = futures::future::join_all(self.handles.drain(..)).await;

        let mut shutdown_failure = None;
        for outcome in outcomes {
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    warn!("Writer task panicked: {}", join_err);
                    self.failure
                        .get_or_insert(LoadError::Connection(format!("writer task failed: {join_err}")));
                    continue;
                }
            };
            self.stats.merge(outcome.stats);
            if let Some(e) = outcome.error {
                if self.failure.is_none() {
                    self.failure = Some(e);
                } else {
                    warn!(writer = outcome.writer_id, "Writer also failed: {}", e);
                }
            }
            if let Err(e) = outcome.shutdown {
                warn!(writer = outcome.writer_id, "Writer shutdown failed: {}", e);
                shutdown_failure.get_or_insert(e);
            }
        }

        match (self.failure.take(), shutdown_failure) {
            (Some(e), _) => Err(e),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(()),
        }
    }

    fn take_stats(&mut self) -> WriterStats {
        std::mem::take(&mut self.stats)
    }
}

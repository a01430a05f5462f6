use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::accumulator::Batch;
use crate::db::Destination;
use crate::error::LoadError;
use crate::telemetry::TelemetryEvent;

/// Work handed to a writer over its queue
pub enum WorkItem {
    Batch(Batch),
    /// Answered once every item queued before it has been handled
    Barrier(oneshot::Sender<()>),
    /// Run a statement verbatim; the ack carries whether it succeeded
    Execute {
        sql: String,
        ack: oneshot::Sender<bool>,
    },
}

/// What one writer committed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub rows_written: BTreeMap<String, u64>,
    pub batches_written: u64,
    pub raw_statements_executed: u64,
}

impl WriterStats {
    pub fn record_batch(&mut self, batch: &Batch) {
        *self.rows_written.entry(batch.table.clone()).or_default() += batch.rows.len() as u64;
        self.batches_written += 1;
    }

    pub fn merge(&mut self, other: WriterStats) {
        for (table, rows) in other.rows_written {
            *self.rows_written.entry(table).or_default() += rows;
        }
        self.batches_written += other.batches_written;
        self.raw_statements_executed += other.raw_statements_executed;
    }

    pub fn total_rows(&self) -> u64 {
        self.rows_written.values().sum()
    }
}

/// Write one batch, reporting its latency
pub async fn write_batch_timed(
    destination: &mut dyn Destination,
    batch: &Batch,
    telemetry: Option<&mpsc::UnboundedSender<TelemetryEvent>>,
) -> Result<(), LoadError> {
    let start = Instant::now();
    destination.write_batch(batch).await?;
    let duration_ms = start.elapsed().as_millis() as u64;
    debug!(
        table = batch.table,
        rows = batch.rows.len(),
        duration_ms,
        "Batch written"
    );
    if let Some(tx) = telemetry {
        let _ = tx.send(TelemetryEvent::BatchWritten {
            rows: batch.rows.len() as u64,
            duration_ms,
        });
    }
    Ok(())
}

/// Final state of a writer task
pub struct WriterOutcome {
    pub writer_id: usize,
    pub stats: WriterStats,
    pub error: Option<LoadError>,
    pub shutdown: Result<(), LoadError>,
}

/// A writer owning one destination, fed through a bounded queue
pub struct Writer {
    pub writer_id: usize,
    pub destination: Box<dyn Destination>,
    pub cancel: CancellationToken,
    /// Shared by all writers of a run; cancelled by the first one that fails
    pub failed: CancellationToken,
    pub telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
}

impl Writer {
    /// Consume work items until the queue closes or an item fails
    ///
    /// The destination is shut down on every exit path.
    pub async fn run(mut self, mut queue: mpsc::Receiver<WorkItem>) -> WriterOutcome {
        let mut stats = WriterStats::default();
        let mut error = None;

        while let Some(item) = queue.recv().await {
            match item {
                WorkItem::Batch(batch) => {
                    if self.cancel.is_cancelled() {
                        error = Some(LoadError::Cancelled);
                        break;
                    }
                    if self.failed.is_cancelled() {
                        debug!(writer = self.writer_id, "Another writer failed, dropping queued batches");
                        break;
                    }
                    match write_batch_timed(
                        self.destination.as_mut(),
                        &batch,
                        self.telemetry_tx.as_ref(),
                    )
                    .await
                    {
                        Ok(()) => stats.record_batch(&batch),
                        Err(e) => {
                            warn!(writer = self.writer_id, "Batch for {} failed: {}", batch.table, e);
                            error = Some(e);
                            break;
                        }
                    }
                }
                WorkItem::Barrier(done) => {
                    let _ = done.send(());
                }
                WorkItem::Execute { sql, ack } => match self.destination.execute(&sql).await {
                    Ok(()) => {
                        stats.raw_statements_executed += 1;
                        if let Some(tx) = &self.telemetry_tx {
                            let _ = tx.send(TelemetryEvent::StatementExecuted);
                        }
                        let _ = ack.send(true);
                    }
                    Err(e) => {
                        let _ = ack.send(false);
                        error = Some(e);
                        break;
                    }
                },
            }
        }

        if error.is_some() {
            self.failed.cancel();
        }
        // Producers see a closed queue from here on
        drop(queue);
        let shutdown = self.destination.shutdown().await;
        debug!(writer = self.writer_id, "Writer stopped");

        WriterOutcome {
            writer_id: self.writer_id,
            stats,
            error,
            shutdown,
        }
    }
}

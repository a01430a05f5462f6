/// Telemetry events sent from the engine and writers for progress tracking
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Total dump bytes consumed so far
    BytesScanned { bytes: u64 },
    /// A batch was committed
    BatchWritten { rows: u64, duration_ms: u64 },
    /// A raw statement was executed
    StatementExecuted,
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub bytes_scanned: u64,
    pub rows_written: u64,
    pub batches_written: u64,
    pub statements_executed: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::BytesScanned { bytes } => {
                self.bytes_scanned = self.bytes_scanned.max(*bytes);
            }
            TelemetryEvent::BatchWritten { rows, duration_ms } => {
                self.rows_written += rows;
                self.batches_written += 1;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::StatementExecuted => {
                self.statements_executed += 1;
            }
        }
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();
        percentile_of_sorted(&sorted, p)
    }

    /// Get p50, p90, p99 percentiles, sorting the durations once
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();
        (
            percentile_of_sorted(&sorted, 50.0),
            percentile_of_sorted(&sorted, 90.0),
            percentile_of_sorted(&sorted, 99.0),
        )
    }
}

fn percentile_of_sorted(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = index.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[index])
}

/// Rate-limits `BytesScanned` events to one per `interval` bytes of input
#[derive(Debug)]
pub struct ScanProgress {
    interval: u64,
    last_reported: u64,
}

impl ScanProgress {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            last_reported: 0,
        }
    }

    /// The event to send at this position, if enough input went by since the last one
    pub fn advance(&mut self, bytes: u64) -> Option<TelemetryEvent> {
        if bytes < self.last_reported.saturating_add(self.interval) {
            return None;
        }
        self.last_reported = bytes;
        Some(TelemetryEvent::BytesScanned { bytes })
    }

    /// The last position, unless it was already reported
    pub fn finish(&mut self, bytes: u64) -> Option<TelemetryEvent> {
        if bytes == self.last_reported {
            return None;
        }
        self.last_reported = bytes;
        Some(TelemetryEvent::BytesScanned { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_accumulates() {
        let mut stats = ProgressStats::new();
        stats.update(&TelemetryEvent::BytesScanned { bytes: 100 });
        stats.update(&TelemetryEvent::BatchWritten {
            rows: 10,
            duration_ms: 5,
        });
        stats.update(&TelemetryEvent::BatchWritten {
            rows: 7,
            duration_ms: 9,
        });
        stats.update(&TelemetryEvent::BytesScanned { bytes: 250 });
        stats.update(&TelemetryEvent::StatementExecuted);

        assert_eq!(stats.bytes_scanned, 250);
        assert_eq!(stats.rows_written, 17);
        assert_eq!(stats.batches_written, 2);
        assert_eq!(stats.statements_executed, 1);
    }

    #[test]
    fn test_percentiles() {
        let mut stats = ProgressStats::new();
        assert_eq!(stats.get_percentiles(), (None, None, None));

        for ms in 1..=100 {
            stats.update(&TelemetryEvent::BatchWritten {
                rows: 1,
                duration_ms: ms,
            });
        }
        assert_eq!(stats.get_percentiles(), (Some(50), Some(90), Some(99)));
        assert_eq!(stats.percentile(0.0), Some(1));
        assert_eq!(stats.percentile(100.0), Some(100));
    }

    #[test]
    fn test_scan_progress_reports_once_per_interval() {
        let mut progress = ScanProgress::new(100);
        let reported: Vec<u64> = (1..=350u64)
            .step_by(7)
            .filter_map(|bytes| match progress.advance(bytes) {
                Some(TelemetryEvent::BytesScanned { bytes }) => Some(bytes),
                _ => None,
            })
            .collect();
        assert_eq!(reported, vec![106, 211, 316]);

        assert!(matches!(
            progress.finish(344),
            Some(TelemetryEvent::BytesScanned { bytes: 344 })
        ));
        assert!(progress.finish(344).is_none());
    }
}

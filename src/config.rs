//! Configuration constants for the dump loader
//!
//! This module centralizes all tunable parameters and defaults used throughout
//! the application.

use std::time::Duration;

// ============================================================================
// Dump Reading
// ============================================================================

/// Size of chunks when reading the dump in streaming fashion
///
/// Statements spanning chunk boundaries are stitched together by the scanner,
/// so this only trades syscalls against memory.
pub const CHUNK_SIZE: usize = 64 * 1024; // 64 KB

/// Largest single statement the scanner will buffer before giving up
///
/// mysqldump's extended inserts are bounded by `max_allowed_packet`, which
/// tops out at 1 GB; typical dumps stay far below this.
pub const DEFAULT_MAX_STATEMENT_BYTES: usize = 256 * 1024 * 1024; // 256 MB

/// Record pattern used by mysqldump's extended inserts
pub const DEFAULT_RECORD_IDENTIFIER: &str = "INSERT INTO `?` VALUES";

pub const DEFAULT_ENCODING: &str = "UTF-8";

// ============================================================================
// Batching
// ============================================================================

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Approximate bytes buffered per table before a batch is flushed early
pub const DEFAULT_ROW_MEMORY_LIMIT: usize = 64 * 1024 * 1024; // 64 MB

// ============================================================================
// Pipelined Writes
// ============================================================================

/// Batches that may wait in each writer's queue before the parser suspends
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

// ============================================================================
// Progress
// ============================================================================

/// How often the batch latency percentiles are recomputed for the progress bars
pub const PROGRESS_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

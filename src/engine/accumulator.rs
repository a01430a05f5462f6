use std::collections::HashMap;

use crate::dump::{Row, RowGroup};

/// Rows bound for one table, written as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Row>,
    /// Order in which the batch was started, across all tables
    pub seq: u64,
}

struct Pending {
    batch: Batch,
    bytes: usize,
}

/// Buffers rows per table and emits bounded batches
///
/// A table's batch is emitted once it holds `batch_size` rows or its buffered
/// rows exceed `row_memory_limit` bytes. Rows keep dump order within a table.
pub struct BatchAccumulator {
    batch_size: usize,
    row_memory_limit: usize,
    pending: HashMap<String, Pending>,
    next_seq: u64,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize, row_memory_limit: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            row_memory_limit: row_memory_limit.max(1),
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Buffer a group of rows, returning every batch that became full
    pub fn push(&mut self, group: RowGroup) -> Vec<Batch> {
        let RowGroup {
            table,
            columns,
            rows,
            ..
        } = group;
        let mut ready = Vec::new();

        let columns_changed = self
            .pending
            .get(&table)
            .is_some_and(|p| p.batch.columns != columns);
        if columns_changed {
            ready.extend(self.pending.remove(&table).map(|p| p.batch));
        }

        for row in rows {
            let size = row.approx_size();
            let next_seq = &mut self.next_seq;
            let pending = self.pending.entry(table.clone()).or_insert_with(|| {
                let seq = *next_seq;
                *next_seq += 1;
                Pending {
                    batch: Batch {
                        table: table.clone(),
                        columns: columns.clone(),
                        rows: Vec::new(),
                        seq,
                    },
                    bytes: 0,
                }
            });
            pending.batch.rows.push(row);
            pending.bytes += size;

            if pending.batch.rows.len() >= self.batch_size || pending.bytes >= self.row_memory_limit
            {
                ready.extend(self.pending.remove(&table).map(|p| p.batch));
            }
        }
        ready
    }

    /// Emit every partial batch, oldest first
    pub fn flush_all(&mut self) -> Vec<Batch> {
        let mut batches: Vec<Batch> = self.pending.drain().map(|(_, p)| p.batch).collect();
        batches.sort_by_key(|b| b.seq);
        batches
    }

    /// Emit the leftovers at end of input
    pub fn drain(&mut self) -> Vec<Batch> {
        self.flush_all()
    }

    /// Rows currently buffered across all tables
    pub fn buffered_rows(&self) -> usize {
        self.pending.values().map(|p| p.batch.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::RawValue;

    fn group(table: &str, ids: &[i32]) -> RowGroup {
        RowGroup {
            table: table.to_string(),
            columns: None,
            rows: ids
                .iter()
                .map(|id| Row::new(vec![RawValue::Bare(id.to_string())]))
                .collect(),
            offset: 0,
        }
    }

    fn ids(batch: &Batch) -> Vec<String> {
        batch
            .rows
            .iter()
            .map(|r| r.values[0].as_text().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_emits_full_batches() {
        let mut acc = BatchAccumulator::new(2, usize::MAX);
        let ready = acc.push(group("t", &[1, 2, 3, 4, 5]));
        assert_eq!(ready.len(), 2);
        assert_eq!(ids(&ready[0]), vec!["1", "2"]);
        assert_eq!(ids(&ready[1]), vec!["3", "4"]);
        assert_eq!(acc.buffered_rows(), 1);

        let rest = acc.drain();
        assert_eq!(rest.len(), 1);
        assert_eq!(ids(&rest[0]), vec!["5"]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_batch_size_one_emits_every_row() {
        let mut acc = BatchAccumulator::new(1, usize::MAX);
        let ready = acc.push(group("cities", &[1, 2, 3]));
        assert_eq!(ready.len(), 3);
        assert!(acc.drain().is_empty());
    }

    #[test]
    fn test_memory_ceiling_flushes_early() {
        let row_size = Row::new(vec![RawValue::Bare("1".into())]).approx_size();
        let mut acc = BatchAccumulator::new(100, row_size * 2);
        let ready = acc.push(group("t", &[1, 2, 3]));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].rows.len(), 2);
    }

    #[test]
    fn test_tables_are_batched_independently() {
        let mut acc = BatchAccumulator::new(2, usize::MAX);
        assert!(acc.push(group("a", &[1])).is_empty());
        assert!(acc.push(group("b", &[10])).is_empty());
        let ready = acc.push(group("a", &[2]));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].table, "a");

        let rest = acc.drain();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].table, "b");
    }

    #[test]
    fn test_drain_keeps_start_order() {
        let mut acc = BatchAccumulator::new(10, usize::MAX);
        acc.push(group("c", &[1]));
        acc.push(group("a", &[2]));
        acc.push(group("b", &[3]));
        acc.push(group("c", &[4]));
        let tables: Vec<_> = acc.flush_all().into_iter().map(|b| b.table).collect();
        assert_eq!(tables, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_column_list_change_flushes_pending_batch() {
        let mut acc = BatchAccumulator::new(10, usize::MAX);
        acc.push(group("t", &[1, 2]));
        let mut with_columns = group("t", &[3]);
        with_columns.columns = Some(vec!["id".to_string()]);
        let ready = acc.push(with_columns);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].columns, None);
        assert_eq!(ids(&ready[0]), vec!["1", "2"]);

        let rest = acc.drain();
        assert_eq!(rest[0].columns, Some(vec!["id".to_string()]));
    }

    #[test]
    fn test_no_rows_lost_or_duplicated() {
        let mut acc = BatchAccumulator::new(7, usize::MAX);
        let mut seen = Vec::new();
        for chunk in (0..100).collect::<Vec<_>>().chunks(9) {
            for batch in acc.push(group("t", chunk)) {
                assert!(batch.rows.len() <= 7);
                seen.extend(ids(&batch));
            }
        }
        for batch in acc.drain() {
            seen.extend(ids(&batch));
        }
        let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }
}

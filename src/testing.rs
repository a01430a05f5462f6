//! In-memory destinations for unit tests

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::db::{Connector, Destination};
use crate::engine::Batch;
use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Exists(String),
    Execute(String),
    Batch(Batch),
    Shutdown,
}

#[derive(Default)]
struct State {
    events: Vec<Event>,
    tables: HashSet<String>,
    fail_execute: Option<String>,
    fail_write_table: Option<String>,
    fail_shutdown: bool,
    cancel_after_batch: Option<CancellationToken>,
    connections: usize,
}

/// Shared view of everything the recording destinations saw
#[derive(Clone, Default)]
pub struct RecordLog {
    state: Arc<Mutex<State>>,
}

impl RecordLog {
    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn events(&self) -> Vec<Event> {
        self.with(|s| s.events.clone())
    }

    pub fn executed(&self) -> Vec<String> {
        self.with(|s| {
            s.events
                .iter()
                .filter_map(|e| match e {
                    Event::Execute(sql) => Some(sql.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.with(|s| {
            s.events
                .iter()
                .filter_map(|e| match e {
                    Event::Batch(b) => Some(b.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn shutdowns(&self) -> usize {
        self.with(|s| {
            s.events
                .iter()
                .filter(|e| matches!(e, Event::Shutdown))
                .count()
        })
    }

    pub fn connections(&self) -> usize {
        self.with(|s| s.connections)
    }

    pub fn fail_execute_containing(&self, needle: &str) {
        self.with(|s| s.fail_execute = Some(needle.to_string()));
    }

    pub fn fail_writes_to(&self, table: &str) {
        self.with(|s| s.fail_write_table = Some(table.to_string()));
    }

    pub fn fail_shutdown(&self) {
        self.with(|s| s.fail_shutdown = true);
    }

    pub fn cancel_after_first_batch(&self, token: CancellationToken) {
        self.with(|s| s.cancel_after_batch = Some(token));
    }
}

/// Destination that records every call instead of talking to a database
pub struct RecordingDestination {
    log: RecordLog,
}

impl RecordingDestination {
    pub fn new() -> (Self, RecordLog) {
        Self::with_tables(&[])
    }

    pub fn with_tables(tables: &[&str]) -> (Self, RecordLog) {
        let log = RecordLog::default();
        log.with(|s| s.tables.extend(tables.iter().map(|t| t.to_string())));
        (Self { log: log.clone() }, log)
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    async fn table_exists(&mut self, table: &str) -> bool {
        self.log.with(|s| {
            s.events.push(Event::Exists(table.to_string()));
            s.tables.contains(table)
        })
    }

    async fn execute(&mut self, sql: &str) -> Result<(), LoadError> {
        self.log.with(|s| {
            if s.fail_execute.as_deref().is_some_and(|n| sql.contains(n)) {
                return Err(LoadError::statement_rejected(0, "syntax error"));
            }
            s.events.push(Event::Execute(sql.to_string()));
            let mut words = sql.split_whitespace();
            if words.next().is_some_and(|w| w.eq_ignore_ascii_case("CREATE"))
                && words.next().is_some_and(|w| w.eq_ignore_ascii_case("TABLE"))
            {
                if let Some(name) = words.next() {
                    s.tables.insert(name.trim_matches('`').to_string());
                }
            }
            Ok(())
        })
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<(), LoadError> {
        self.log.with(|s| {
            if s.fail_write_table.as_deref() == Some(batch.table.as_str()) {
                return Err(LoadError::write_rejected(
                    &batch.table,
                    batch.rows.len(),
                    "constraint violation",
                ));
            }
            s.events.push(Event::Batch(batch.clone()));
            if let Some(token) = s.cancel_after_batch.take() {
                token.cancel();
            }
            Ok(())
        })
    }

    async fn shutdown(self: Box<Self>) -> Result<(), LoadError> {
        self.log.with(|s| {
            s.events.push(Event::Shutdown);
            if s.fail_shutdown {
                Err(LoadError::Connection("connection reset".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

/// Connector handing out recording destinations that share one log
pub struct MockConnector {
    log: RecordLog,
    fail_connect: bool,
}

impl MockConnector {
    pub fn new() -> (Self, RecordLog) {
        let log = RecordLog::default();
        (
            Self {
                log: log.clone(),
                fail_connect: false,
            },
            log,
        )
    }

    pub fn failing() -> Self {
        Self {
            log: RecordLog::default(),
            fail_connect: true,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Destination>, LoadError> {
        if self.fail_connect {
            return Err(LoadError::Connection("connection refused".to_string()));
        }
        self.log.with(|s| s.connections += 1);
        Ok(Box::new(RecordingDestination {
            log: self.log.clone(),
        }))
    }
}

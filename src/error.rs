//! Error types for the dump loader.

use thiserror::Error;

/// Errors that terminate (or, for malformed statements, may skip) a load run.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Invalid or missing option, detected before any I/O starts
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A data statement that could not be parsed
    #[error("Malformed statement at byte offset {offset}: {reason}")]
    MalformedStatement { offset: u64, reason: String },

    /// The destination could not be reached, or the connection was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// The destination refused a batch
    #[error("Write rejected for table {table} ({rows} rows): {message}")]
    WriteRejected {
        table: String,
        rows: usize,
        message: String,
    },

    /// The destination refused a non-data statement forwarded from the dump
    #[error("Statement at byte offset {offset} rejected: {message}")]
    StatementRejected { offset: u64, message: String },

    /// A creation or post-creation script failed
    #[error("Schema bootstrap failed for {object}: {message}")]
    SchemaBootstrap { object: String, message: String },

    /// Reading the dump source failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was stopped by an external signal
    #[error("Load cancelled")]
    Cancelled,
}

impl LoadError {
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        LoadError::MalformedStatement {
            offset,
            reason: reason.into(),
        }
    }

    pub fn write_rejected(table: impl Into<String>, rows: usize, message: impl Into<String>) -> Self {
        LoadError::WriteRejected {
            table: table.into(),
            rows,
            message: message.into(),
        }
    }

    pub fn statement_rejected(offset: u64, message: impl Into<String>) -> Self {
        LoadError::StatementRejected {
            offset,
            message: message.into(),
        }
    }

    pub fn bootstrap(object: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::SchemaBootstrap {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Classify a driver error raised while writing rows into `table`.
    ///
    /// Errors reported by the database itself (constraint violations, type
    /// mismatches) reject the batch; everything else means the connection is
    /// unusable.
    pub fn from_write(table: &str, rows: usize, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => LoadError::write_rejected(table, rows, db_err.to_string()),
            other => LoadError::from_driver(other),
        }
    }

    /// Classify a driver error raised while executing a statement verbatim.
    ///
    /// The destination does not know where the statement came from, so the
    /// offset starts at 0; see [`LoadError::at_offset`].
    pub fn from_statement(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => LoadError::statement_rejected(0, db_err.to_string()),
            other => LoadError::from_driver(other),
        }
    }

    /// Attach the dump offset of the statement a rejection belongs to
    pub fn at_offset(self, offset: u64) -> Self {
        match self {
            LoadError::StatementRejected { message, .. } => {
                LoadError::StatementRejected { offset, message }
            }
            other => other,
        }
    }

    /// Classify a driver error raised outside of a batch write.
    pub fn from_driver(err: sqlx::Error) -> Self {
        LoadError::Connection(err.to_string())
    }

    /// Whether a skip-and-continue policy may resume after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LoadError::MalformedStatement { .. })
    }
}

use tracing::debug;

use super::pattern::RecordPattern;
use super::row::Row;
use super::scanner::StatementScanner;
use super::tuples::TupleParser;
use crate::config::DEFAULT_MAX_STATEMENT_BYTES;
use crate::error::LoadError;
use crate::io::DumpSource;

/// Rows extracted from one data-insertion statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroup {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Row>,
    /// Byte offset of the statement in the dump
    pub offset: u64,
}

/// One unit produced by the parser, in dump order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedStatement {
    Rows(RowGroup),
    /// A non-data statement forwarded verbatim for execution
    Raw { offset: u64, sql: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    pub process_ddl: bool,
    pub backslash_escapes: bool,
    pub max_statement_bytes: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            process_ddl: false,
            backslash_escapes: true,
            max_statement_bytes: DEFAULT_MAX_STATEMENT_BYTES,
        }
    }
}

/// Lazy, forward-only parser over a dump
pub struct DumpParser {
    scanner: StatementScanner,
    pattern: RecordPattern,
    options: ParserOptions,
    skipped_statements: u64,
}

impl DumpParser {
    pub fn new(source: DumpSource, pattern: RecordPattern, options: ParserOptions) -> Self {
        Self {
            scanner: StatementScanner::new(
                source,
                options.backslash_escapes,
                options.max_statement_bytes,
            ),
            pattern,
            options,
            skipped_statements: 0,
        }
    }

    /// Number of non-data statements dropped because DDL processing is off
    pub fn skipped_statements(&self) -> u64 {
        self.skipped_statements
    }

    pub fn bytes_read(&self) -> u64 {
        self.scanner.bytes_read()
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.scanner.size_hint()
    }

    /// Next parsed statement, or `None` at end of input
    ///
    /// A `MalformedStatement` error leaves the parser positioned after the
    /// offending statement, so callers may keep pulling.
    pub async fn next_statement(&mut self) -> Result<Option<ParsedStatement>, LoadError> {
        while let Some(stmt) = self.scanner.next_statement().await? {
            let Some(matched) = self.pattern.match_statement(&stmt.text) else {
                if self.options.process_ddl {
                    return Ok(Some(ParsedStatement::Raw {
                        offset: stmt.offset,
                        sql: stmt.text,
                    }));
                }
                self.skipped_statements += 1;
                debug!(offset = stmt.offset, "Skipping statement: {}", summarize(&stmt.text));
                continue;
            };

            let rows = TupleParser::new(matched.body, self.options.backslash_escapes)
                .parse_all()
                .map_err(|reason| LoadError::malformed(stmt.offset, reason))?;

            if self.pattern.one_insert_per_row() && rows.len() != 1 {
                return Err(LoadError::malformed(
                    stmt.offset,
                    format!(
                        "expected exactly one row per statement, found {}",
                        rows.len()
                    ),
                ));
            }

            return Ok(Some(ParsedStatement::Rows(RowGroup {
                table: matched.table,
                columns: matched.columns,
                rows,
                offset: stmt.offset,
            })));
        }
        Ok(None)
    }
}

/// First line of a statement, shortened for log output
fn summarize(sql: &str) -> &str {
    const MAX: usize = 80;
    let line = sql.lines().next().unwrap_or_default().trim();
    match line.char_indices().nth(MAX) {
        Some((cut, _)) => &line[..cut],
        None => line,
    }
}

//! Streaming dump parser
//!
//! `scanner` cuts the byte stream into statements, `pattern` recognizes the
//! data-insertion ones, and `tuples` extracts their rows.

pub mod parser;
pub mod pattern;
pub mod row;
pub mod scanner;
pub mod tuples;

pub use parser::{DumpParser, ParsedStatement, ParserOptions, RowGroup};
pub use pattern::RecordPattern;
pub use row::{RawValue, Row};

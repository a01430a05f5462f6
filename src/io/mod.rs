//! I/O abstraction layer for reading dump bytes

pub mod dump_source;
pub mod encoding;

pub use dump_source::DumpSource;
pub use encoding::Encoding;

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::encoding::Encoding;
use crate::config::CHUNK_SIZE;
use crate::error::LoadError;

/// Read-once, forward-only byte stream of a dump with its declared encoding
pub struct DumpSource {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    encoding: Encoding,
    size_hint: Option<u64>,
    bytes_read: u64,
}

impl DumpSource {
    /// Open a dump file on the local filesystem
    pub async fn open(path: impl AsRef<Path>, encoding: Encoding) -> Result<Self, LoadError> {
        let file = File::open(path.as_ref()).await?;
        let size = file.metadata().await?.len();
        let mut source = Self::from_reader(file, encoding);
        source.size_hint = Some(size);
        Ok(source)
    }

    /// Wrap any async reader, e.g. an in-memory buffer in tests
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static, encoding: Encoding) -> Self {
        Self {
            reader: Box::new(reader),
            encoding,
            size_hint: None,
            bytes_read: 0,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Total size in bytes, when the source is a file
    pub fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Append up to `CHUNK_SIZE` bytes to `buffer`. Returns 0 at end of input.
    pub async fn read_chunk(&mut self, buffer: &mut Vec<u8>) -> Result<usize, LoadError> {
        let start = buffer.len();
        buffer.resize(start + CHUNK_SIZE, 0);
        let read = self.reader.read(&mut buffer[start..]).await;
        // Shrink back before propagating so the buffer never holds garbage
        let n = *read.as_ref().unwrap_or(&0);
        buffer.truncate(start + n);
        read?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

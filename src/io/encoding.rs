use crate::error::LoadError;

/// Text encodings a dump may be declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
}

impl Encoding {
    /// Parse an encoding label (case-insensitive)
    pub fn parse(label: &str) -> Result<Self, LoadError> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "utf8mb4" => Ok(Encoding::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Ok(Encoding::Latin1),
            other => Err(LoadError::Configuration(format!(
                "Unsupported encoding: {}. Supported encodings: UTF-8, ISO-8859-1",
                other
            ))),
        }
    }

    /// Decode one complete statement. `offset` is only used for error reporting.
    pub fn decode(self, bytes: &[u8], offset: u64) -> Result<String, LoadError> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).map(str::to_owned).map_err(|e| {
                LoadError::malformed(
                    offset + e.valid_up_to() as u64,
                    "invalid UTF-8 sequence in statement",
                )
            }),
            // Every ISO-8859-1 byte maps to the code point of the same value
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

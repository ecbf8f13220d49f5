//! Error handling utilities shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient result type used throughout the crate.
pub type Result<T, E = TallyError> = std::result::Result<T, E>;

/// Domain-specific error describing failures during configuration, scanning, or output.
#[derive(Debug, Error)]
pub enum TallyError {
    /// Pipeline configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The input corpus could not be opened or sized.
    #[error("unable to open input {path:?}: {source}")]
    OpenInput {
        /// Input path that failed to open.
        path: PathBuf,
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
    },
    /// An output destination could not be created or truncated.
    #[error("unable to create output {path:?}: {source}")]
    CreateOutput {
        /// Output path that failed to open for writing.
        path: PathBuf,
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
    },
    /// Filesystem IO error with optional context path.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
        /// Target path associated with the IO failure if available.
        path: Option<PathBuf>,
    },
    /// A record exceeded the configured maximum length under the reject policy.
    #[error("record at byte offset {offset} is {len} bytes long, limit is {max}")]
    RecordTooLong {
        /// Byte offset of the record's first byte within the input.
        offset: u64,
        /// Length of the record excluding its terminator.
        len: usize,
        /// Configured maximum record length.
        max: usize,
    },
    /// A unique-token count fell outside the tracked histogram domain.
    #[error("unique count {value} exceeds the tracked maximum of {max}")]
    CountOutOfRange {
        /// Offending value.
        value: usize,
        /// Largest value the histogram can hold.
        max: usize,
    },
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Catch-all variant for invariants that should not occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TallyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl TallyError {
    /// Helper constructor that attaches an optional path when wrapping IO errors.
    pub fn io(source: std::io::Error, path: Option<PathBuf>) -> Self {
        Self::Io { source, path }
    }
}

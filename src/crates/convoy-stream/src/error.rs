//! Error types for the streaming boundary.

use thiserror::Error;

/// Errors produced while consuming a provider stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A provider chunk could not be decoded from the wire format.
    #[error("Malformed stream chunk: {0}")]
    MalformedChunk(String),
}

/// Convenience result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

//! Error types for context window management
//!
//! All errors implement `std::error::Error` via the `thiserror` crate and
//! bubble to the caller unmodified - this crate never wraps or translates
//! errors from injected collaborators.
//!
//! # Error Hierarchy
//!
//! ```text
//! ContextError
//! ├── InvalidOptions      - Incompatible trim/prune configuration
//! ├── HistoryRegression   - Message history shrank between calls
//! └── MalformedPayload    - Reasoning continuity cannot be preserved
//! ```

use thiserror::Error;

/// Errors produced by the trim and prune engines.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// Incompatible option combination supplied by the caller.
    ///
    /// **Common causes**:
    /// - `start_on` combined with the `First` strategy
    /// - `include_system` combined with the `First` strategy
    ///
    /// **Recovery**: fix the options before calling; these combinations are
    /// rejected up front rather than producing a silently wrong window.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The tracked message history shrank between calls.
    ///
    /// The incremental engines detect new messages by comparing array
    /// lengths, which requires histories to grow by appending only. A
    /// shorter array than the previous call means the caller mutated or
    /// replaced the history, so cached token counts can no longer be
    /// trusted.
    ///
    /// **Recovery**: use one engine instance per conversation run.
    #[error("Message history shrank from {previous} to {current} entries; histories must only grow by appending")]
    HistoryRegression {
        /// Length of the history on the previous call
        previous: usize,
        /// Length of the history on the current call
        current: usize,
    },

    /// A reasoning block could not be kept attached to its assistant turn.
    ///
    /// Raised when pruning detects a trailing assistant/tool sequence but
    /// either no thinking block can be located inside it, or the surviving
    /// window holds no assistant message that could carry the relocated
    /// block. Silently dropping the block would break providers that
    /// require reasoning continuity, so this is deliberately fatal.
    #[error("The payload is malformed: {0}")]
    MalformedPayload(String),
}

impl ContextError {
    /// Create an `InvalidOptions` error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions(message.into())
    }

    /// Create a `MalformedPayload` error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }
}

/// Convenience result type for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = ContextError::invalid_options("start_on is not supported with the First strategy");
        assert_eq!(
            err.to_string(),
            "Invalid options: start_on is not supported with the First strategy"
        );

        let err = ContextError::HistoryRegression { previous: 5, current: 3 };
        assert!(err.to_string().contains("5"));
        assert!(err.to_string().contains("3"));

        let err = ContextError::malformed("no assistant message to carry the reasoning block");
        assert!(err.to_string().starts_with("The payload is malformed"));
    }
}

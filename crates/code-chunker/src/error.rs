use thiserror::Error;

use crate::types::Blocker;

/// Result type for chunker operations
pub type Result<T> = std::result::Result<T, ChunkerError>;

/// Errors that can occur during chunking and planning
#[derive(Error, Debug)]
pub enum ChunkerError {
    /// Submission exceeds the configured size limit
    #[error("Submission too large: {size} bytes (limit {limit})")]
    SubmissionTooLarge { size: usize, limit: usize },

    /// Planning was requested for text that is not a complete set of statements
    #[error("Incomplete submission: {0}")]
    Incomplete(Blocker),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Statement spans do not cover the submission
    #[error("Invalid statement span: start={start}, end={end}")]
    InvalidSpan { start: usize, end: usize },
}

impl ChunkerError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Failures talking to the external interpreter.
///
/// Every variant is fatal for the session: retrying is meaningless until the
/// process is re-established.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Interpreter did not respond within {timeout:?}")]
    Unresponsive { timeout: Duration },

    #[error("Interpreter process terminated")]
    Terminated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

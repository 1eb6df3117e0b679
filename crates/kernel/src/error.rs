use thiserror::Error;

pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Chunker error: {0}")]
    ChunkerError(#[from] stata_code_chunker::ChunkerError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

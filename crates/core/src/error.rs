use thiserror::Error;

#[derive(Error, Debug)]
pub enum SealerError {
    #[error("request cancelled")]
    Cancelled,

    #[error("unknown file types specified: {0:#05b}")]
    UnknownFileTypes(u8),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("unsupported proof type: {0}")]
    UnsupportedProof(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("{0}")]
    Other(String),
}

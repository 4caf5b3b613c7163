use thiserror::Error;

use sealer_core::SealerError;

/// Errors surfaced by the scheduler to `schedule` callers and operators.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("scheduler closing")]
    Closing,

    #[error("request cancelled")]
    Cancelled,

    #[error("worker closing")]
    WorkerClosing,

    /// The request was dropped without a response, e.g. its window reached
    /// a worker loop that had already exited.
    #[error("request abandoned before a response was sent")]
    Abandoned,

    /// Opaque failure from a prepare or execute action.
    #[error(transparent)]
    Task(anyhow::Error),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl From<SealerError> for SchedError {
    fn from(err: SealerError) -> Self {
        match err {
            SealerError::Cancelled => SchedError::Cancelled,
            SealerError::Worker(msg) => SchedError::Worker(msg),
            other => SchedError::Worker(other.to_string()),
        }
    }
}

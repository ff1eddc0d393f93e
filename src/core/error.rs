use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignError {
    #[error("Invalid spatial key '{0}'")]
    InvalidKey(String),

    #[error("Line index {index} out of range (max {max})")]
    LineOutOfRange { index: usize, max: usize },

    #[error("No sign at {0}")]
    NotFound(String),

    #[error("Chat editing is disabled")]
    EditingDisabled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, SignError>;

/// Failure reported by a render-handle provider.
///
/// These never reach callers of the reconciler; they only decide whether a
/// key is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("render handle no longer exists")]
    Gone,

    #[error("render provider rejected the request: {0}")]
    Rejected(String),
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// The error taxonomy surfaced across cache, upload, pipeline and job
/// components. HTTP status mapping lives in the server crate; this enum
/// only carries what the core needs to decide and log.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("rate limited")]
    RateLimited,

    #[error("pipeline execution failed at node {node_id}: {cause}")]
    PipelineExecutionError { node_id: String, cause: String },

    #[error("pipeline stage unavailable: {0}")]
    PipelineStageUnavailable(String),

    #[error("bundle finalize failed: {0}")]
    BundleFinalizeFailed(String),

    #[error("summary invalid: {0}")]
    SummaryInvalid(String),

    #[error("summary.json invalid: {0}")]
    SummaryJsonInvalid(String),

    #[error("profile version mismatch: expected {expected}, found {found}")]
    ProfileVersionMismatch { expected: String, found: String },

    #[error("summary text mismatch between manifest and summary.json")]
    SummaryTextMismatch,

    #[error("cache entry invalid: {0}")]
    CacheInvalid(String),

    #[error("gc error: {0}")]
    GcError(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("dag has a cycle: {0}")]
    DagCycle(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    /// Classification used by the worker to decide whether a failure is
    /// worth a bounded retry.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::TimedOut(_) | CoreError::PipelineStageUnavailable(_) => {
                ErrorCategory::Transient
            }
            CoreError::Database(_) | CoreError::Io(_) => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Permanent,
        }
    }
}

/// Error category for worker retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Retry automatically with backoff (timeout, semaphore contention).
    Transient,
    /// Don't retry (invalid input, validation failure).
    Permanent,
    /// Alert ops (disk, db).
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

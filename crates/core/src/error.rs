use thiserror::Error;

/// Failure walking a schema-less document by path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty field path")]
    EmptyPath,
    #[error("{path}: intermediate value is not a mapping")]
    NotAMapping { path: String },
    #[error("{path}: expected {expected}, found {found}")]
    TypeMismatch { path: String, expected: &'static str, found: &'static str },
}

/// Errors surfaced by transports, the conflict-retrying mutator and the reconciler.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("gave up after {attempts} conflicting attempts")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("transport: {0}")]
    Transport(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool { matches!(self, Error::NotFound(_)) }
    pub fn is_already_exists(&self) -> bool { matches!(self, Error::AlreadyExists(_)) }
    pub fn is_conflict(&self) -> bool { matches!(self, Error::Conflict(_)) }
    pub fn is_cancelled(&self) -> bool { matches!(self, Error::Cancelled) }

    /// Network-level failures that may be retried blindly for idempotent calls.
    pub fn is_retryable_transport(&self) -> bool { matches!(self, Error::Transport(_)) }

    /// Short stable label, used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::Invalid(_) => "invalid",
            Error::Conflict(_) => "conflict",
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::Cancelled => "cancelled",
            Error::Transport(_) => "transport",
            Error::Path(_) => "path",
            Error::Codec(_) => "codec",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

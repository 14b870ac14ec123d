use std::path::PathBuf;

/// All errors produced by lakefs-spec.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("transaction aborted: {source}")]
    TransactionAborted {
        #[source]
        source: Box<Error>,
    },

    #[error("placeholder accessed before it was fulfilled")]
    PlaceholderUnfulfilled,

    #[error("placeholder already fulfilled")]
    PlaceholderFulfilled,

    #[error("operation '{0}' references a placeholder that was never fulfilled")]
    DanglingPlaceholder(String),

    #[error("a hook is already registered for event '{0}'")]
    HookRegistered(String),

    #[error("unknown file system event {0:?}")]
    UnknownEvent(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("HTTP{status}: {message}")]
    Api { status: u16, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl Error {
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    pub fn revision_not_found(msg: impl Into<String>) -> Self {
        Self::RevisionNotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap the error that caused a transaction to abort.
    pub fn transaction_aborted(source: Error) -> Self {
        Self::TransactionAborted {
            source: Box::new(source),
        }
    }

    /// A generic backing-store failure (HTTP 500).
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Api {
            status: 500,
            message: msg.into(),
        }
    }

    /// Translate a backing-store status code into the error taxonomy.
    ///
    /// 401/403 map to [`Error::Permission`], 404 to [`Error::NotFound`],
    /// 409 to [`Error::Conflict`]; anything else stays an [`Error::Api`].
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Permission(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            _ => Self::Api { status, message },
        }
    }

    /// Translate a raw response, extracting `{"message": ...}` from a JSON body
    /// when present.
    pub fn from_response(status: u16, reason: &str, body: &str) -> Self {
        let mut msg = format!("HTTP{} ({})", status, reason);
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(detail) = value.get("message").and_then(|m| m.as_str()) {
                msg.push_str(": ");
                msg.push_str(detail);
            }
        }
        Self::from_status(status, msg)
    }

    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.into().display(), err),
        ))
    }

    /// `true` for [`Error::NotFound`] and [`Error::RevisionNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::RevisionNotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

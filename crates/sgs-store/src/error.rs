/// Errors from object store operations.
///
/// Backend driver errors never cross this boundary as-is; adapters render
/// them into [`StoreError::Backend`] or [`StoreError::Conflict`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend is unreachable or rejected the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// An unconditional insert hit an existing key.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored row could not be decoded into a domain record.
    #[error("corrupt row {key}: {reason}")]
    CorruptRow { key: String, reason: String },

    /// The request itself is not acceptable to the backend.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The store configuration is invalid or names an unavailable backend.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

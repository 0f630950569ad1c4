use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("stream id must not be empty")]
    EmptyStreamId,

    #[error("stream id too long: {len} bytes (max {max})")]
    StreamIdTooLong { len: usize, max: usize },

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("{kind} target requires a {field}")]
    MissingResourceField {
        kind: &'static str,
        field: &'static str,
    },
}

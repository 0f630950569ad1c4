use sgs_closure::ClosureError;
use sgs_crypto::HasherError;
use sgs_store::StoreError;
use sgs_types::{ContentHash, TypeError};
use thiserror::Error;

/// Input rejected before anything is written. Never worth retrying.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid object id {id:?}: {source}")]
    InvalidObjectId { id: String, source: TypeError },

    #[error("invalid stream id: {0}")]
    InvalidStreamId(TypeError),

    #[error("invalid cursor token {0:?}")]
    InvalidCursor(String),

    #[error("object {object} references {child}, which is neither stored nor earlier in the batch")]
    DanglingReference {
        object: ContentHash,
        child: ContentHash,
    },

    #[error("object {object} references {child}, whose closure was never recorded; re-ingest it with closures first")]
    IncompleteClosure {
        object: ContentHash,
        child: ContentHash,
    },

    #[error("object {0} references itself")]
    SelfReference(ContentHash),

    #[error("reference cycle involving object {0}")]
    ReferenceCycle(ContentHash),
}

impl From<ClosureError> for ValidationError {
    fn from(err: ClosureError) -> Self {
        match err {
            ClosureError::DanglingReference { object, child } => {
                Self::DanglingReference { object, child }
            }
            ClosureError::SelfReference(id) => Self::SelfReference(id),
            ClosureError::CycleDetected(id) => Self::ReferenceCycle(id),
        }
    }
}

impl From<HasherError> for ValidationError {
    fn from(err: HasherError) -> Self {
        Self::MalformedPayload(err.to_string())
    }
}

/// The two failure families callers of the object store see.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ObjectError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<ClosureError> for ObjectError {
    fn from(err: ClosureError) -> Self {
        Self::Validation(err.into())
    }
}

impl From<HasherError> for ObjectError {
    fn from(err: HasherError) -> Self {
        Self::Validation(err.into())
    }
}

pub type ObjectResult<T> = Result<T, ObjectError>;

//! Error types for closure derivation.

use sgs_types::ContentHash;

/// Errors raised while ordering a batch or deriving closures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClosureError {
    /// A child reference points at an object that is neither stored nor
    /// processed earlier in the batch.
    #[error("dangling reference: object {object} references missing child {child}")]
    DanglingReference {
        /// The object containing the bad reference.
        object: ContentHash,
        /// The missing child.
        child: ContentHash,
    },

    /// An object lists itself as a child.
    #[error("object {0} references itself")]
    SelfReference(ContentHash),

    /// The references of a batch form a cycle.
    #[error("reference cycle detected involving object {0}")]
    CycleDetected(ContentHash),
}

/// Convenience alias for closure results.
pub type ClosureResult<T> = Result<T, ClosureError>;

//! Foundation types for the scene-graph object store.
//!
//! Every other `sgs-*` crate depends on `sgs-types`.
//!
//! # Key Types
//!
//! - [`ContentHash`] -- Content-addressed object identifier (BLAKE3 digest)
//! - [`StreamId`] -- Collaboration namespace that owns stored objects
//! - [`ResourceTarget`] -- Closed set of resources other services point at

pub mod error;
pub mod object;
pub mod resource;
pub mod stream;

pub use error::TypeError;
pub use object::ContentHash;
pub use resource::{ResourceKind, ResourceTarget};
pub use stream::StreamId;

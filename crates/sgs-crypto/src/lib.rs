//! Content hashing for the scene-graph object store.
//!
//! Provides canonical JSON normalization of object payloads and
//! domain-separated BLAKE3 hashing over the normalized bytes. Two payloads
//! that differ only in key order or whitespace hash identically; any other
//! change, including reordering array elements, changes the hash.

pub mod canonical;
pub mod hasher;

pub use canonical::{canonical_bytes, normalize_payload, parse_payload, ID_KEY};
pub use hasher::{ContentHasher, HasherError};

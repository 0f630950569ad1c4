//! Persistence for scene-graph objects and their reachability index.
//!
//! Two relations make up the store:
//!
//! - `objects`: immutable JSON payloads keyed by `(stream_id, id)`, where
//!   `id` is the payload's content hash.
//! - `object_closures`: one row per `(stream_id, ancestor, descendant)`
//!   carrying the shortest reference path length between the two.
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectRepository`] trait:
//!
//! - [`InMemoryObjectStore`] -- `BTreeMap`-based store for tests and embedding
//! - `PostgresObjectStore` -- sqlx-backed store, behind the `postgres` feature
//!
//! # Design Rules
//!
//! 1. Object rows are never updated once written.
//! 2. Closure rows only ever move to a smaller `min_depth`.
//! 3. A [`WriteBatch`] is applied atomically.
//! 4. Duplicate inserts under [`InsertMode::IfAbsent`] are absorbed by the
//!    backend, so concurrent writers of the same content never fail.
//! 5. The store never interprets payloads.

pub mod config;
pub mod error;
pub mod memory;
pub mod object;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use config::{
    open_repository, BackendConfig, CursorConfig, StoreConfig, MAX_INSERT_CHUNK_SIZE,
};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectStore;
pub use object::{
    merge_min, ChildrenQuery, ClosureEntry, ClosureKey, InsertMode, PageRequest, RowId,
    SpeckleObject, WriteBatch, WriteOutcome,
};
#[cfg(feature = "postgres")]
pub use postgres::PostgresObjectStore;
pub use traits::ObjectRepository;

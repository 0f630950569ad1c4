//! Scene-graph object store.
//!
//! Ingests JSON objects keyed by content hash, collapses duplicates, keeps a
//! transitive-closure index over child references and serves reads, either
//! by id or as a lazily pulled scan over a whole stream.
//!
//! # Ingest pipeline
//!
//! 1. [`assign_id`] hashes each payload (or parses a pre-assigned id).
//! 2. The batch is ordered children-first and closures are derived.
//! 3. [`DedupeGate`] drops objects and closure entries already stored.
//! 4. [`ObjectWriter`] writes the rest as one atomic batch.
//!
//! [`ObjectReader`] and [`StreamCursor`] serve the read side. [`ObjectService`]
//! ties them to one repository handle.

pub mod cursor;
pub mod dedupe;
pub mod error;
pub mod model;
pub mod reader;
pub mod service;
pub mod writer;

pub use cursor::{BatchedSelectOptions, CursorToken, ObjectBatch, StreamCursor};
pub use dedupe::DedupeGate;
pub use error::{ObjectError, ObjectResult, ValidationError};
pub use model::{
    assign_id, parse_stream_id, ClosureMode, InsertableSpeckleObject, RawSpeckleObject,
};
pub use reader::ObjectReader;
pub use service::ObjectService;
pub use writer::{IngestReport, ObjectWriter};

// Re-export key types
pub use sgs_store::{
    ChildrenQuery, ClosureEntry, CursorConfig, ObjectRepository, RowId, SpeckleObject,
    StoreConfig, StoreError,
};
pub use sgs_types::{ContentHash, ResourceTarget, StreamId};

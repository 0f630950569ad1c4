use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sgs_types::{ContentHash, StreamId};

use crate::error::StoreResult;
use crate::object::{
    ChildrenQuery, ClosureEntry, PageRequest, SpeckleObject, WriteBatch, WriteOutcome,
};

/// Durable home of the `objects` and `object_closures` relations.
///
/// All implementations must satisfy these invariants:
/// - Object rows are keyed by `(stream_id, id)`. Their payload is never
///   updated in place; only the closure-complete flag may flip to `true`.
/// - Closure rows are keyed by `(stream_id, object_id, child_id)` and only
///   ever change by lowering `min_depth`.
/// - [`apply`](Self::apply) is atomic: either every write of the batch is
///   visible or none is.
/// - Concurrent duplicate inserts are absorbed by the backend's own
///   conditional writes. No caller observes a uniqueness violation from an
///   `IfAbsent` batch.
/// - Missing rows are reported as `None` or omitted, never as errors.
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Read one object.
    async fn get_object(
        &self,
        stream_id: &StreamId,
        id: &ContentHash,
    ) -> StoreResult<Option<SpeckleObject>>;

    /// Read the existing subset of `ids`, ordered by id.
    async fn get_objects(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<Vec<SpeckleObject>>;

    /// Which of `ids` already have an object row.
    async fn existing_object_ids(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<HashSet<ContentHash>>;

    /// Which of `ids` are stored without a complete closure, i.e. were
    /// written by a batch that did not carry their closure entries.
    async fn incomplete_object_ids(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<HashSet<ContentHash>>;

    /// Stored depths for the given `(object_id, child_id)` pairs. Absent
    /// pairs are left out of the map.
    async fn closure_depths(
        &self,
        stream_id: &StreamId,
        pairs: &[(ContentHash, ContentHash)],
    ) -> StoreResult<HashMap<(ContentHash, ContentHash), u32>>;

    /// Every closure row whose ancestor is one of `object_ids`.
    async fn get_closures(
        &self,
        stream_id: &StreamId,
        object_ids: &[ContentHash],
    ) -> StoreResult<Vec<ClosureEntry>>;

    /// Descendants of `object_id`, ordered by `(min_depth, id)`.
    async fn get_children(
        &self,
        stream_id: &StreamId,
        object_id: &ContentHash,
        query: ChildrenQuery,
    ) -> StoreResult<Vec<SpeckleObject>>;

    /// One keyset page of the stream's objects, ordered by id.
    async fn page_objects(
        &self,
        stream_id: &StreamId,
        page: &PageRequest,
    ) -> StoreResult<Vec<SpeckleObject>>;

    /// Largest object id currently stored for the stream.
    async fn max_object_id(&self, stream_id: &StreamId) -> StoreResult<Option<ContentHash>>;

    /// Number of objects stored for the stream.
    async fn count_objects(&self, stream_id: &StreamId) -> StoreResult<u64>;

    /// Apply a batch of writes atomically.
    async fn apply(&self, batch: WriteBatch) -> StoreResult<WriteOutcome>;
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sgs_store::{ChildrenQuery, ClosureEntry, CursorConfig, ObjectRepository, SpeckleObject};
use sgs_types::{ContentHash, ResourceTarget, StreamId};
use tracing::debug;

use crate::cursor::{BatchedSelectOptions, StreamCursor};
use crate::error::ObjectResult;

/// Read side of the object store. Missing objects are never errors.
#[derive(Clone)]
pub struct ObjectReader {
    repo: Arc<dyn ObjectRepository>,
    cursor: CursorConfig,
}

impl ObjectReader {
    pub fn new(repo: Arc<dyn ObjectRepository>) -> Self {
        Self::with_cursor_config(repo, CursorConfig::default())
    }

    pub fn with_cursor_config(repo: Arc<dyn ObjectRepository>, cursor: CursorConfig) -> Self {
        Self { repo, cursor }
    }

    pub async fn get_object(
        &self,
        stream_id: &StreamId,
        object_id: &ContentHash,
    ) -> ObjectResult<Option<SpeckleObject>> {
        Ok(self.repo.get_object(stream_id, object_id).await?)
    }

    /// The stored subset of `object_ids`, ordered by id.
    pub async fn get_stream_objects(
        &self,
        stream_id: &StreamId,
        object_ids: &[ContentHash],
    ) -> ObjectResult<Vec<SpeckleObject>> {
        if object_ids.is_empty() {
            return Ok(Vec::new());
        }
        let objects = self.repo.get_objects(stream_id, object_ids).await?;
        debug!(
            stream = %stream_id,
            requested = object_ids.len(),
            found = objects.len(),
            "stream objects read"
        );
        Ok(objects)
    }

    /// Existence of each requested id.
    pub async fn has_objects(
        &self,
        stream_id: &StreamId,
        object_ids: &[ContentHash],
    ) -> ObjectResult<BTreeMap<ContentHash, bool>> {
        let existing = if object_ids.is_empty() {
            Default::default()
        } else {
            self.repo.existing_object_ids(stream_id, object_ids).await?
        };
        Ok(object_ids
            .iter()
            .map(|id| (*id, existing.contains(id)))
            .collect())
    }

    /// Objects reachable from `object_id`, nearest first, served from the
    /// closure index.
    pub async fn get_object_children(
        &self,
        stream_id: &StreamId,
        object_id: &ContentHash,
        query: ChildrenQuery,
    ) -> ObjectResult<Vec<SpeckleObject>> {
        Ok(self.repo.get_children(stream_id, object_id, query).await?)
    }

    /// Closure entries of `object_id`, ordered by `(min_depth, child_id)`.
    pub async fn get_object_closure(
        &self,
        stream_id: &StreamId,
        object_id: &ContentHash,
    ) -> ObjectResult<Vec<ClosureEntry>> {
        let mut entries = self
            .repo
            .get_closures(stream_id, std::slice::from_ref(object_id))
            .await?;
        entries.sort_by(|a, b| {
            a.min_depth
                .cmp(&b.min_depth)
                .then_with(|| a.child_id.cmp(&b.child_id))
        });
        Ok(entries)
    }

    pub async fn count_stream_objects(&self, stream_id: &StreamId) -> ObjectResult<u64> {
        Ok(self.repo.count_objects(stream_id).await?)
    }

    /// Fetch the objects named by object targets. Other resource kinds are
    /// ignored.
    pub async fn resolve_object_targets(
        &self,
        stream_id: &StreamId,
        targets: &[ResourceTarget],
    ) -> ObjectResult<Vec<SpeckleObject>> {
        let ids: Vec<ContentHash> = targets
            .iter()
            .filter_map(ResourceTarget::object_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.get_stream_objects(stream_id, &ids).await
    }

    /// Lazily scan every object of the stream in id order.
    pub fn get_batched_stream_objects(
        &self,
        stream_id: &StreamId,
        options: BatchedSelectOptions,
    ) -> StreamCursor {
        let batch_size = self.cursor.resolve(options.batch_size);
        StreamCursor::new(
            self.repo.clone(),
            stream_id.clone(),
            batch_size,
            options.after,
        )
    }
}

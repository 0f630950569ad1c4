use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use sgs_store::{merge_min, ClosureEntry, ObjectRepository};
use sgs_types::{ContentHash, StreamId};
use tracing::debug;

use crate::error::ObjectResult;

/// Filters out writes the store already holds.
///
/// The gate is an optimization. Its answers can be stale by the time the
/// write lands, so writers still go through the backend's insert-if-absent
/// and keep-minimum upserts.
#[derive(Clone)]
pub struct DedupeGate {
    repo: Arc<dyn ObjectRepository>,
}

impl DedupeGate {
    pub fn new(repo: Arc<dyn ObjectRepository>) -> Self {
        Self { repo }
    }

    /// The subset of `ids` with no stored object in the stream.
    pub async fn filter_new(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> ObjectResult<HashSet<ContentHash>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let existing = self.repo.existing_object_ids(stream_id, ids).await?;
        let fresh: HashSet<ContentHash> = ids
            .iter()
            .filter(|id| !existing.contains(id))
            .copied()
            .collect();
        debug!(
            stream = %stream_id,
            requested = ids.len(),
            new = fresh.len(),
            "object ids filtered"
        );
        Ok(fresh)
    }

    /// The subset of `ids` stored in the stream without a complete closure.
    pub async fn filter_incomplete(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> ObjectResult<HashSet<ContentHash>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let incomplete = self.repo.incomplete_object_ids(stream_id, ids).await?;
        debug!(
            stream = %stream_id,
            requested = ids.len(),
            incomplete = incomplete.len(),
            "closure completeness checked"
        );
        Ok(incomplete)
    }

    /// Entries whose key is absent or stored with a larger depth.
    ///
    /// Entries sharing a key are merged first, keeping the smallest depth.
    pub async fn filter_new_closures(
        &self,
        entries: Vec<ClosureEntry>,
    ) -> ObjectResult<Vec<ClosureEntry>> {
        let merged = merge_min(entries);
        if merged.is_empty() {
            return Ok(merged);
        }

        let mut by_stream: BTreeMap<StreamId, Vec<ClosureEntry>> = BTreeMap::new();
        for entry in merged {
            by_stream.entry(entry.stream_id.clone()).or_default().push(entry);
        }

        let mut needed = Vec::new();
        for (stream_id, entries) in by_stream {
            let pairs: Vec<(ContentHash, ContentHash)> = entries
                .iter()
                .map(|e| (e.object_id, e.child_id))
                .collect();
            let stored = self.repo.closure_depths(&stream_id, &pairs).await?;
            let before = entries.len();
            needed.extend(entries.into_iter().filter(|e| {
                stored
                    .get(&(e.object_id, e.child_id))
                    .map_or(true, |depth| *depth > e.min_depth)
            }));
            debug!(stream = %stream_id, requested = before, "closure entries filtered");
        }
        Ok(needed)
    }
}

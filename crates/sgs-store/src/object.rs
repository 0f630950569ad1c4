use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sgs_types::{ContentHash, StreamId};

/// A stored scene-graph object.
///
/// `data` is opaque to the store. It is kept exactly as handed over by the
/// writer, which has already stamped the object's own id into it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeckleObject {
    pub id: ContentHash,
    pub stream_id: StreamId,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl SpeckleObject {
    pub fn new(stream_id: StreamId, id: ContentHash, data: Value) -> Self {
        Self {
            id,
            stream_id,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (StreamId, ContentHash) {
        (self.stream_id.clone(), self.id)
    }
}

/// Primary key of a closure row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureKey {
    pub stream_id: StreamId,
    pub object_id: ContentHash,
    pub child_id: ContentHash,
}

/// One `(ancestor, descendant, minDepth)` fact of the closure index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureEntry {
    pub stream_id: StreamId,
    /// The ancestor.
    pub object_id: ContentHash,
    /// The descendant.
    pub child_id: ContentHash,
    /// Length of the shortest reference path, at least 1.
    pub min_depth: u32,
}

impl ClosureEntry {
    pub fn new(
        stream_id: StreamId,
        object_id: ContentHash,
        child_id: ContentHash,
        min_depth: u32,
    ) -> Self {
        Self {
            stream_id,
            object_id,
            child_id,
            min_depth,
        }
    }

    pub fn key(&self) -> ClosureKey {
        ClosureKey {
            stream_id: self.stream_id.clone(),
            object_id: self.object_id,
            child_id: self.child_id,
        }
    }
}

/// Collapse entries that share a key, keeping the smallest depth.
///
/// The result is sorted by key. Backends need this before a multi-row
/// upsert since one statement may not touch the same row twice.
pub fn merge_min(entries: impl IntoIterator<Item = ClosureEntry>) -> Vec<ClosureEntry> {
    let mut merged: BTreeMap<ClosureKey, u32> = BTreeMap::new();
    for entry in entries {
        merged
            .entry(entry.key())
            .and_modify(|depth| *depth = (*depth).min(entry.min_depth))
            .or_insert(entry.min_depth);
    }
    merged
        .into_iter()
        .map(|(key, min_depth)| ClosureEntry {
            stream_id: key.stream_id,
            object_id: key.object_id,
            child_id: key.child_id,
            min_depth,
        })
        .collect()
}

/// Backend-assigned identifier of an inserted object row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How object rows of a [`WriteBatch`] treat existing keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertMode {
    /// Any existing key fails the whole batch with a conflict.
    Strict,
    /// Existing keys are skipped silently.
    IfAbsent,
}

/// A unit of writes applied atomically by [`ObjectRepository::apply`].
///
/// Object rows are written according to `mode`. Closure rows are always
/// upserted keeping the minimum depth.
///
/// `complete` names the objects whose full closure the batch carries (or
/// that have no children at all). Backends record this per object row.
/// An existing row that was not complete is upgraded when a later batch
/// completes it; a complete row is never downgraded.
///
/// [`ObjectRepository::apply`]: crate::traits::ObjectRepository::apply
#[derive(Clone, Debug)]
pub struct WriteBatch {
    pub objects: Vec<SpeckleObject>,
    pub mode: InsertMode,
    pub closures: Vec<ClosureEntry>,
    pub complete: HashSet<(StreamId, ContentHash)>,
}

impl WriteBatch {
    pub fn new(mode: InsertMode) -> Self {
        Self {
            objects: Vec::new(),
            mode,
            closures: Vec::new(),
            complete: HashSet::new(),
        }
    }

    pub fn with_objects(mut self, objects: Vec<SpeckleObject>) -> Self {
        self.objects = objects;
        self
    }

    pub fn with_closures(mut self, closures: Vec<ClosureEntry>) -> Self {
        self.closures = closures;
        self
    }

    /// Mark objects of this batch as carrying their full closure.
    pub fn with_complete(
        mut self,
        keys: impl IntoIterator<Item = (StreamId, ContentHash)>,
    ) -> Self {
        self.complete.extend(keys);
        self
    }

    pub fn is_complete(&self, object: &SpeckleObject) -> bool {
        self.complete.contains(&object.key())
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.closures.is_empty()
    }
}

/// What a [`WriteBatch`] changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Row ids of newly inserted objects. Skipped duplicates have none.
    pub row_ids: Vec<RowId>,
    /// Closure rows inserted or lowered.
    pub closures_written: usize,
    /// Existing object rows whose closure became complete.
    pub rows_completed: usize,
}

impl WriteOutcome {
    pub fn objects_inserted(&self) -> usize {
        self.row_ids.len()
    }
}

/// One keyset page of a stream's objects, ordered by id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Exclusive lower bound.
    pub after: Option<ContentHash>,
    /// Inclusive upper bound.
    pub until: Option<ContentHash>,
    pub limit: usize,
}

/// Filter for reachability queries over the closure index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChildrenQuery {
    /// Only descendants with `min_depth <= max_depth`.
    pub max_depth: Option<u32>,
    pub limit: Option<usize>,
}

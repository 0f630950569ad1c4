use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use sgs_types::{ContentHash, StreamId};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{
    merge_min, ChildrenQuery, ClosureEntry, ClosureKey, InsertMode, PageRequest, RowId,
    SpeckleObject, WriteBatch, WriteOutcome,
};
use crate::traits::ObjectRepository;

const LOWEST: ContentHash = ContentHash::from_hash([0x00; 32]);
const HIGHEST: ContentHash = ContentHash::from_hash([0xff; 32]);

type ObjectKey = (StreamId, ContentHash);

struct StoredRow {
    object: SpeckleObject,
    closures_complete: bool,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, StoredRow>,
    closures: BTreeMap<ClosureKey, u32>,
    next_row_id: i64,
}

/// In-memory, BTreeMap-based object store.
///
/// Intended for tests and embedding. Both relations live behind one
/// `RwLock`, so every [`WriteBatch`] is applied under a single write guard
/// and is atomic with respect to concurrent readers and writers. Keys are
/// ordered, which gives keyset pages and closure scans for free.
pub struct InMemoryObjectStore {
    state: RwLock<State>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Number of object rows across all streams.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.objects.len())
    }

    /// Returns `true` if no object rows are stored.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of closure rows across all streams.
    pub fn closure_len(&self) -> StoreResult<usize> {
        Ok(self.read()?.closures.len())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn closures_of<'a>(
        &'a self,
        stream_id: &StreamId,
        object_id: &ContentHash,
    ) -> impl Iterator<Item = (&'a ClosureKey, &'a u32)> + 'a {
        let lo = ClosureKey {
            stream_id: stream_id.clone(),
            object_id: *object_id,
            child_id: LOWEST,
        };
        let hi = ClosureKey {
            stream_id: stream_id.clone(),
            object_id: *object_id,
            child_id: HIGHEST,
        };
        self.closures.range(lo..=hi)
    }

    fn stream_objects<'a>(
        &'a self,
        stream_id: &StreamId,
    ) -> impl DoubleEndedIterator<Item = &'a StoredRow> + 'a {
        self.objects
            .range((stream_id.clone(), LOWEST)..=(stream_id.clone(), HIGHEST))
            .map(|(_, row)| row)
    }
}

#[async_trait]
impl ObjectRepository for InMemoryObjectStore {
    async fn get_object(
        &self,
        stream_id: &StreamId,
        id: &ContentHash,
    ) -> StoreResult<Option<SpeckleObject>> {
        let state = self.read()?;
        Ok(state
            .objects
            .get(&(stream_id.clone(), *id))
            .map(|row| row.object.clone()))
    }

    async fn get_objects(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<Vec<SpeckleObject>> {
        let state = self.read()?;
        let mut wanted: Vec<ContentHash> = ids.to_vec();
        wanted.sort();
        wanted.dedup();
        Ok(wanted
            .into_iter()
            .filter_map(|id| state.objects.get(&(stream_id.clone(), id)))
            .map(|row| row.object.clone())
            .collect())
    }

    async fn existing_object_ids(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<HashSet<ContentHash>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter(|id| state.objects.contains_key(&(stream_id.clone(), **id)))
            .copied()
            .collect())
    }

    async fn incomplete_object_ids(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<HashSet<ContentHash>> {
        let state = self.read()?;
        let incomplete = ids
            .iter()
            .filter(|id| {
                state
                    .objects
                    .get(&(stream_id.clone(), **id))
                    .is_some_and(|row| !row.closures_complete)
            })
            .copied()
            .collect();
        Ok(incomplete)
    }

    async fn closure_depths(
        &self,
        stream_id: &StreamId,
        pairs: &[(ContentHash, ContentHash)],
    ) -> StoreResult<HashMap<(ContentHash, ContentHash), u32>> {
        let state = self.read()?;
        let mut found = HashMap::new();
        for &(object_id, child_id) in pairs {
            let key = ClosureKey {
                stream_id: stream_id.clone(),
                object_id,
                child_id,
            };
            if let Some(depth) = state.closures.get(&key) {
                found.insert((object_id, child_id), *depth);
            }
        }
        Ok(found)
    }

    async fn get_closures(
        &self,
        stream_id: &StreamId,
        object_ids: &[ContentHash],
    ) -> StoreResult<Vec<ClosureEntry>> {
        let state = self.read()?;
        let mut parents: Vec<ContentHash> = object_ids.to_vec();
        parents.sort();
        parents.dedup();
        Ok(parents
            .iter()
            .flat_map(|parent| state.closures_of(stream_id, parent))
            .map(|(key, depth)| ClosureEntry {
                stream_id: key.stream_id.clone(),
                object_id: key.object_id,
                child_id: key.child_id,
                min_depth: *depth,
            })
            .collect())
    }

    async fn get_children(
        &self,
        stream_id: &StreamId,
        object_id: &ContentHash,
        query: ChildrenQuery,
    ) -> StoreResult<Vec<SpeckleObject>> {
        let state = self.read()?;
        let mut reachable: Vec<(u32, ContentHash)> = state
            .closures_of(stream_id, object_id)
            .filter(|(_, depth)| query.max_depth.map_or(true, |max| **depth <= max))
            .map(|(key, depth)| (*depth, key.child_id))
            .collect();
        reachable.sort();

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(reachable
            .into_iter()
            .filter_map(|(_, child)| state.objects.get(&(stream_id.clone(), child)))
            .take(limit)
            .map(|row| row.object.clone())
            .collect())
    }

    async fn page_objects(
        &self,
        stream_id: &StreamId,
        page: &PageRequest,
    ) -> StoreResult<Vec<SpeckleObject>> {
        if let (Some(after), Some(until)) = (page.after, page.until) {
            if after >= until {
                return Ok(Vec::new());
            }
        }
        let lower = match page.after {
            Some(after) => Bound::Excluded((stream_id.clone(), after)),
            None => Bound::Included((stream_id.clone(), LOWEST)),
        };
        let upper = Bound::Included((stream_id.clone(), page.until.unwrap_or(HIGHEST)));

        let state = self.read()?;
        Ok(state
            .objects
            .range((lower, upper))
            .take(page.limit)
            .map(|(_, row)| row.object.clone())
            .collect())
    }

    async fn max_object_id(&self, stream_id: &StreamId) -> StoreResult<Option<ContentHash>> {
        let state = self.read()?;
        let max = state.stream_objects(stream_id).next_back().map(|row| row.object.id);
        Ok(max)
    }

    async fn count_objects(&self, stream_id: &StreamId) -> StoreResult<u64> {
        let state = self.read()?;
        let count = state.stream_objects(stream_id).count();
        Ok(count as u64)
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<WriteOutcome> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        // Check everything before touching anything so a conflict leaves
        // the store untouched.
        if batch.mode == InsertMode::Strict {
            let mut seen = HashSet::new();
            for object in &batch.objects {
                let key = (object.stream_id.clone(), object.id);
                if state.objects.contains_key(&key) || !seen.insert(key) {
                    return Err(StoreError::Conflict(format!(
                        "object {} already exists in stream {}",
                        object.id, object.stream_id
                    )));
                }
            }
        }

        let mut outcome = WriteOutcome::default();
        for object in batch.objects {
            let closures_complete = batch.complete.contains(&object.key());
            match state.objects.entry(object.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(StoredRow {
                        object,
                        closures_complete,
                    });
                    state.next_row_id += 1;
                    outcome.row_ids.push(RowId(state.next_row_id));
                }
                Entry::Occupied(mut slot) => {
                    let row = slot.get_mut();
                    if closures_complete && !row.closures_complete {
                        row.closures_complete = true;
                        outcome.rows_completed += 1;
                    }
                }
            }
        }

        for entry in merge_min(batch.closures) {
            match state.closures.entry(entry.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(entry.min_depth);
                    outcome.closures_written += 1;
                }
                Entry::Occupied(mut slot) if *slot.get() > entry.min_depth => {
                    slot.insert(entry.min_depth);
                    outcome.closures_written += 1;
                }
                Entry::Occupied(_) => {}
            }
        }

        debug!(
            inserted = outcome.objects_inserted(),
            completed = outcome.rows_completed,
            closures = outcome.closures_written,
            "applied write batch"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len().ok())
            .field("closure_count", &self.closure_len().ok())
            .finish()
    }
}

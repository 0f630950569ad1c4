use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sgs_closure::{ingest_order, BatchNode, Closure, ClosureBuilder};
use sgs_crypto::ContentHasher;
use sgs_store::{
    ClosureEntry, InsertMode, ObjectRepository, RowId, SpeckleObject, WriteBatch, WriteOutcome,
};
use sgs_types::{ContentHash, StreamId};
use tracing::{debug, info, warn};

use crate::dedupe::DedupeGate;
use crate::error::{ObjectError, ObjectResult, ValidationError};
use crate::model::{ClosureMode, InsertableSpeckleObject, PreparedObject};

/// What one ingest call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Ids of the submitted objects, in input order.
    pub ids: Vec<ContentHash>,
    pub objects_inserted: usize,
    pub closures_written: usize,
    /// Stored objects whose closure this call completed.
    pub objects_completed: usize,
}

impl IngestReport {
    /// Whether the call changed the store at all.
    pub fn wrote_anything(&self) -> bool {
        self.objects_inserted > 0 || self.closures_written > 0 || self.objects_completed > 0
    }
}

/// Persists objects and their closure entries.
#[derive(Clone)]
pub struct ObjectWriter {
    repo: Arc<dyn ObjectRepository>,
    gate: DedupeGate,
    hasher: ContentHasher,
}

impl ObjectWriter {
    pub fn new(repo: Arc<dyn ObjectRepository>) -> Self {
        Self {
            gate: DedupeGate::new(repo.clone()),
            hasher: ContentHasher::OBJECT,
            repo,
        }
    }

    pub fn gate(&self) -> &DedupeGate {
        &self.gate
    }

    // ---- Row-level writes ----

    /// Settle an object's id and build the row for `stream_id`.
    pub fn prepare_object(
        &self,
        stream_id: &StreamId,
        object: impl Into<InsertableSpeckleObject>,
    ) -> ObjectResult<SpeckleObject> {
        Ok(PreparedObject::prepare(&self.hasher, object.into())?.into_object(stream_id))
    }

    /// Insert every object unconditionally.
    ///
    /// Any id already stored fails the whole call with a conflict and
    /// nothing is written, so retrying a partially known batch is unsafe.
    /// Rows written by the row-level methods carry no closure guarantee:
    /// a parent ingested with closures rejects them until they are
    /// re-ingested through [`create_objects`](Self::create_objects).
    pub async fn store_objects(&self, objects: Vec<SpeckleObject>) -> ObjectResult<Vec<RowId>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        let count = objects.len();
        let outcome = self
            .repo
            .apply(WriteBatch::new(InsertMode::Strict).with_objects(objects))
            .await?;
        debug!(count, "objects stored");
        Ok(outcome.row_ids)
    }

    pub async fn store_single_object_if_not_found(&self, object: SpeckleObject) -> ObjectResult<()> {
        self.store_objects_if_not_found(vec![object]).await
    }

    /// Insert the objects that are not stored yet. Duplicates within the
    /// call collapse to their first occurrence.
    pub async fn store_objects_if_not_found(&self, objects: Vec<SpeckleObject>) -> ObjectResult<()> {
        let submitted = objects.len();
        let fresh = self.filter_new_objects(objects).await?;
        if fresh.is_empty() {
            debug!(submitted, "all objects already stored");
            return Ok(());
        }
        let outcome = self
            .repo
            .apply(WriteBatch::new(InsertMode::IfAbsent).with_objects(fresh))
            .await?;
        debug!(
            submitted,
            inserted = outcome.objects_inserted(),
            "objects stored if absent"
        );
        Ok(())
    }

    /// Insert closure entries, keeping the smaller depth on key collisions.
    pub async fn store_closures_if_not_found(&self, entries: Vec<ClosureEntry>) -> ObjectResult<()> {
        let needed = self.gate.filter_new_closures(entries).await?;
        if needed.is_empty() {
            return Ok(());
        }
        let outcome = self
            .repo
            .apply(WriteBatch::new(InsertMode::IfAbsent).with_closures(needed))
            .await?;
        debug!(written = outcome.closures_written, "closures stored if absent");
        Ok(())
    }

    async fn filter_new_objects(
        &self,
        objects: Vec<SpeckleObject>,
    ) -> ObjectResult<Vec<SpeckleObject>> {
        let mut ids_by_stream: BTreeMap<StreamId, Vec<ContentHash>> = BTreeMap::new();
        for object in &objects {
            ids_by_stream
                .entry(object.stream_id.clone())
                .or_default()
                .push(object.id);
        }

        let mut fresh: HashSet<(StreamId, ContentHash)> = HashSet::new();
        for (stream_id, ids) in ids_by_stream {
            for id in self.gate.filter_new(&stream_id, &ids).await? {
                fresh.insert((stream_id.clone(), id));
            }
        }

        // `remove` keeps only the first occurrence of each key.
        Ok(objects
            .into_iter()
            .filter(|o| fresh.remove(&(o.stream_id.clone(), o.id)))
            .collect())
    }

    // ---- Ingest pipeline ----

    /// Hash, derive the closure and store one object. Its children must
    /// already be stored.
    pub async fn create_object<T>(&self, stream_id: &StreamId, object: T) -> ObjectResult<ContentHash>
    where
        T: Into<InsertableSpeckleObject> + Send,
    {
        let prepared = PreparedObject::prepare(&self.hasher, object.into())
            .inspect_err(|e| log_rejection(stream_id, e))?;
        let id = prepared.id;
        self.ingest(stream_id, vec![prepared], ClosureMode::Compute)
            .await?;
        Ok(id)
    }

    /// Ingest a batch with closures. Ids come back in input order.
    pub async fn create_objects<T>(
        &self,
        stream_id: &StreamId,
        objects: Vec<T>,
    ) -> ObjectResult<Vec<ContentHash>>
    where
        T: Into<InsertableSpeckleObject> + Send,
    {
        let report = self
            .create_objects_with_mode(stream_id, objects, ClosureMode::Compute)
            .await?;
        Ok(report.ids)
    }

    /// Ingest a batch in the given mode. Returns whether anything was
    /// written.
    pub async fn create_objects_batched<T>(
        &self,
        stream_id: &StreamId,
        objects: Vec<T>,
        mode: ClosureMode,
    ) -> ObjectResult<bool>
    where
        T: Into<InsertableSpeckleObject> + Send,
    {
        let report = self.create_objects_with_mode(stream_id, objects, mode).await?;
        Ok(report.wrote_anything())
    }

    /// Ingest object rows only.
    pub async fn create_objects_batched_and_no_closures<T>(
        &self,
        stream_id: &StreamId,
        objects: Vec<T>,
    ) -> ObjectResult<Vec<ContentHash>>
    where
        T: Into<InsertableSpeckleObject> + Send,
    {
        let report = self
            .create_objects_with_mode(stream_id, objects, ClosureMode::Skip)
            .await?;
        Ok(report.ids)
    }

    /// Full pipeline: assign ids, order and derive closures, drop what is
    /// already stored, then write objects and closures as one batch.
    ///
    /// All validation happens before the write, so a rejected batch leaves
    /// the store untouched.
    pub async fn create_objects_with_mode<T>(
        &self,
        stream_id: &StreamId,
        objects: Vec<T>,
        mode: ClosureMode,
    ) -> ObjectResult<IngestReport>
    where
        T: Into<InsertableSpeckleObject> + Send,
    {
        let prepared = objects
            .into_iter()
            .map(|o| PreparedObject::prepare(&self.hasher, o.into()))
            .collect::<ObjectResult<Vec<_>>>()
            .inspect_err(|e| log_rejection(stream_id, e))?;
        self.ingest(stream_id, prepared, mode).await
    }

    async fn ingest(
        &self,
        stream_id: &StreamId,
        prepared: Vec<PreparedObject>,
        mode: ClosureMode,
    ) -> ObjectResult<IngestReport> {
        let ids: Vec<ContentHash> = prepared.iter().map(|p| p.id).collect();
        let mut seen = HashSet::with_capacity(prepared.len());
        let unique: Vec<PreparedObject> = prepared.into_iter().filter(|p| seen.insert(p.id)).collect();
        debug!(
            stream = %stream_id,
            submitted = ids.len(),
            unique = unique.len(),
            ?mode,
            "ids assigned"
        );

        let (ordered, closures) = match mode {
            ClosureMode::Skip => (unique, Vec::new()),
            ClosureMode::Compute => self
                .derive_closures(stream_id, unique)
                .await
                .inspect_err(|e| log_rejection(stream_id, e))?,
        };

        // Compute mode carries every closure. Skip mode only completes leaves.
        let complete: HashSet<ContentHash> = ordered
            .iter()
            .filter(|p| mode == ClosureMode::Compute || p.children.is_empty())
            .map(|p| p.id)
            .collect();

        let ordered_ids: Vec<ContentHash> = ordered.iter().map(|p| p.id).collect();
        let fresh = self.gate.filter_new(stream_id, &ordered_ids).await?;
        let stored_but_completable: Vec<ContentHash> = ordered_ids
            .iter()
            .filter(|id| !fresh.contains(*id) && complete.contains(*id))
            .copied()
            .collect();
        let repaired = self
            .gate
            .filter_incomplete(stream_id, &stored_but_completable)
            .await?;
        let objects: Vec<SpeckleObject> = ordered
            .into_iter()
            .filter(|p| fresh.contains(&p.id) || repaired.contains(&p.id))
            .map(|p| p.into_object(stream_id))
            .collect();
        let closures = self.gate.filter_new_closures(closures).await?;
        let deduplicated = ordered_ids.len() - objects.len();

        let batch = WriteBatch::new(InsertMode::IfAbsent)
            .with_objects(objects)
            .with_closures(closures)
            .with_complete(complete.into_iter().map(|id| (stream_id.clone(), id)));
        let outcome = if batch.is_empty() {
            WriteOutcome::default()
        } else {
            self.repo.apply(batch).await?
        };

        info!(
            stream = %stream_id,
            count = ids.len(),
            inserted = outcome.objects_inserted(),
            deduplicated,
            completed = outcome.rows_completed,
            closures = outcome.closures_written,
            "objects ingested"
        );

        Ok(IngestReport {
            ids,
            objects_inserted: outcome.objects_inserted(),
            closures_written: outcome.closures_written,
            objects_completed: outcome.rows_completed,
        })
    }

    /// Order `objects` children-first and derive every closure entry.
    ///
    /// Children outside the batch must be stored with a complete closure;
    /// their stored closures seed the builder.
    async fn derive_closures(
        &self,
        stream_id: &StreamId,
        objects: Vec<PreparedObject>,
    ) -> ObjectResult<(Vec<PreparedObject>, Vec<ClosureEntry>)> {
        let in_batch: HashSet<ContentHash> = objects.iter().map(|o| o.id).collect();
        let mut external: Vec<ContentHash> = objects
            .iter()
            .flat_map(|o| o.children.iter().copied())
            .filter(|child| !in_batch.contains(child))
            .collect();
        external.sort();
        external.dedup();

        let persisted = if external.is_empty() {
            HashSet::new()
        } else {
            self.repo.existing_object_ids(stream_id, &external).await?
        };

        let order = {
            let nodes: Vec<BatchNode<'_>> = objects
                .iter()
                .map(|o| BatchNode::new(o.id, &o.children))
                .collect();
            ingest_order(&nodes, &persisted)?
        };

        let mut builder = ClosureBuilder::new();
        if !persisted.is_empty() {
            let persisted_ids: Vec<ContentHash> = persisted.iter().copied().collect();
            let incomplete = self.gate.filter_incomplete(stream_id, &persisted_ids).await?;
            if !incomplete.is_empty() {
                for object in &objects {
                    if let Some(child) = object.children.iter().find(|c| incomplete.contains(*c)) {
                        return Err(ValidationError::IncompleteClosure {
                            object: object.id,
                            child: *child,
                        }
                        .into());
                    }
                }
            }
            let mut stored: HashMap<ContentHash, Closure> = persisted_ids
                .iter()
                .map(|id| (*id, Closure::new()))
                .collect();
            for entry in self.repo.get_closures(stream_id, &persisted_ids).await? {
                if let Some(closure) = stored.get_mut(&entry.object_id) {
                    closure.insert(entry.child_id, entry.min_depth);
                }
            }
            for (id, closure) in stored {
                builder.register(id, closure);
            }
        }

        let mut slots: Vec<Option<PreparedObject>> = objects.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        let mut entries = Vec::new();
        for index in order {
            let Some(object) = slots[index].take() else {
                continue;
            };
            let closure = builder.build(object.id, &object.children)?;
            entries.extend(closure.into_iter().map(|(child, depth)| {
                ClosureEntry::new(stream_id.clone(), object.id, child, depth)
            }));
            ordered.push(object);
        }

        debug!(
            stream = %stream_id,
            objects = ordered.len(),
            external = persisted.len(),
            entries = entries.len(),
            "closure entries derived"
        );
        Ok((ordered, entries))
    }
}

fn log_rejection(stream_id: &StreamId, err: &ObjectError) {
    if err.is_validation() {
        warn!(stream = %stream_id, error = %err, "object batch rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sgs_store::{ChildrenQuery, InMemoryObjectStore, StoreError};

    use crate::model::RawSpeckleObject;

    fn stream() -> StreamId {
        StreamId::new("stream-1").unwrap()
    }

    fn setup() -> (Arc<InMemoryObjectStore>, ObjectWriter) {
        let store = Arc::new(InMemoryObjectStore::new());
        let writer = ObjectWriter::new(store.clone());
        (store, writer)
    }

    fn raw(name: &str, children: &[ContentHash]) -> RawSpeckleObject {
        RawSpeckleObject::new(json!({ "name": name, "children": children }))
            .with_children(children.to_vec())
    }

    fn hash(object: &RawSpeckleObject) -> ContentHash {
        crate::model::assign_id(&ContentHasher::OBJECT, object).unwrap()
    }

    async fn closure_map(
        store: &InMemoryObjectStore,
        id: ContentHash,
    ) -> BTreeMap<ContentHash, u32> {
        store
            .get_closures(&stream(), &[id])
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.child_id, e.min_depth))
            .collect()
    }

    #[tokio::test]
    async fn create_object_stores_stamped_payload() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let id = writer.create_object(&stream(), leaf.clone()).await.unwrap();
        assert_eq!(id, hash(&leaf));

        let stored = store.get_object(&stream(), &id).await.unwrap().unwrap();
        assert_eq!(stored.data["id"], json!(id.to_hex()));
        assert_eq!(stored.data["name"], json!("leaf"));
    }

    #[tokio::test]
    async fn end_to_end_leaf_branch_root() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let leaf_id = hash(&leaf);
        let branch = raw("branch", &[leaf_id]);
        let branch_id = hash(&branch);
        let root = raw("root", &[branch_id, leaf_id]);
        let root_id = hash(&root);

        let ids = writer
            .create_objects(&stream(), vec![leaf, branch, root])
            .await
            .unwrap();
        assert_eq!(ids, vec![leaf_id, branch_id, root_id]);
        assert_eq!(store.len().unwrap(), 3);
        assert_eq!(store.closure_len().unwrap(), 3);

        assert_eq!(
            closure_map(&store, branch_id).await,
            BTreeMap::from([(leaf_id, 1)])
        );
        assert_eq!(
            closure_map(&store, root_id).await,
            BTreeMap::from([(branch_id, 1), (leaf_id, 1)])
        );
        assert!(closure_map(&store, leaf_id).await.is_empty());
    }

    #[tokio::test]
    async fn shortest_path_is_kept() {
        // A -> B, B -> C, A -> C
        let (store, writer) = setup();
        let c = raw("c", &[]);
        let c_id = hash(&c);
        let b = raw("b", &[c_id]);
        let b_id = hash(&b);
        let a = raw("a", &[b_id, c_id]);
        let a_id = hash(&a);

        writer.create_objects(&stream(), vec![c, b, a]).await.unwrap();
        let closure = closure_map(&store, a_id).await;
        assert_eq!(closure[&c_id], 1);
        assert_eq!(closure[&b_id], 1);
    }

    #[tokio::test]
    async fn parents_may_precede_children_in_the_batch() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let leaf_id = hash(&leaf);
        let branch = raw("branch", &[leaf_id]);
        let branch_id = hash(&branch);
        let root = raw("root", &[branch_id]);
        let root_id = hash(&root);

        let ids = writer
            .create_objects(&stream(), vec![root, branch, leaf])
            .await
            .unwrap();
        assert_eq!(ids, vec![root_id, branch_id, leaf_id]);
        assert_eq!(
            closure_map(&store, root_id).await,
            BTreeMap::from([(branch_id, 1), (leaf_id, 2)])
        );
    }

    #[tokio::test]
    async fn closures_extend_across_calls() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let leaf_id = hash(&leaf);
        let branch = raw("branch", &[leaf_id]);
        let branch_id = hash(&branch);
        writer.create_objects(&stream(), vec![leaf, branch]).await.unwrap();

        let root_id = writer
            .create_object(&stream(), raw("root", &[branch_id]))
            .await
            .unwrap();
        assert_eq!(
            closure_map(&store, root_id).await,
            BTreeMap::from([(branch_id, 1), (leaf_id, 2)])
        );
    }

    #[tokio::test]
    async fn resubmitting_is_idempotent() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let branch = raw("branch", &[hash(&leaf)]);
        let batch = vec![leaf, branch];

        let first = writer
            .create_objects_with_mode(&stream(), batch.clone(), ClosureMode::Compute)
            .await
            .unwrap();
        let second = writer
            .create_objects_with_mode(&stream(), batch, ClosureMode::Compute)
            .await
            .unwrap();

        assert_eq!(first.ids, second.ids);
        assert_eq!(first.objects_inserted, 2);
        assert!(!second.wrote_anything());
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.closure_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicates_in_one_batch_collapse() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let id = hash(&leaf);
        let ids = writer
            .create_objects(&stream(), vec![leaf.clone(), leaf])
            .await
            .unwrap();
        assert_eq!(ids, vec![id, id]);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn forward_reference_persists_nothing() {
        let (store, writer) = setup();
        let ghost = ContentHash::from_bytes(b"never stored");
        let err = writer
            .create_objects(&stream(), vec![raw("ok", &[]), raw("bad", &[ghost])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ObjectError::Validation(ValidationError::DanglingReference { child, .. }) if child == ghost
        ));
        assert!(store.is_empty().unwrap());
        assert_eq!(store.closure_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn references_from_other_streams_are_dangling() {
        let (_, writer) = setup();
        let leaf = raw("leaf", &[]);
        let leaf_id = hash(&leaf);
        let other = StreamId::new("stream-2").unwrap();
        writer.create_object(&other, leaf).await.unwrap();

        let err = writer
            .create_object(&stream(), raw("parent", &[leaf_id]))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn self_reference_is_rejected() {
        let (store, writer) = setup();
        let id = ContentHash::from_bytes(b"me");
        let object = InsertableSpeckleObject::from(raw("me", &[id])).with_id(id.to_hex());
        let err = writer.create_object(&stream(), object).await.unwrap_err();
        assert!(matches!(
            err,
            ObjectError::Validation(ValidationError::SelfReference(_))
        ));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn skip_mode_writes_no_closures() {
        let (store, writer) = setup();
        let ghost = ContentHash::from_bytes(b"elsewhere");
        let ids = writer
            .create_objects_batched_and_no_closures(&stream(), vec![raw("a", &[ghost])])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.closure_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn child_without_closures_blocks_parent() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let mid = raw("mid", &[hash(&leaf)]);
        let mid_id = hash(&mid);
        let root = raw("root", &[mid_id]);
        let root_id = hash(&root);

        writer.create_object(&stream(), leaf).await.unwrap();
        writer
            .create_objects_batched_and_no_closures(&stream(), vec![mid])
            .await
            .unwrap();

        let err = writer.create_object(&stream(), root).await.unwrap_err();
        assert!(matches!(
            err,
            ObjectError::Validation(ValidationError::IncompleteClosure { object, child })
                if object == root_id && child == mid_id
        ));
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.closure_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn reingesting_a_child_completes_its_closure() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let leaf_id = hash(&leaf);
        let mid = raw("mid", &[leaf_id]);
        let mid_id = hash(&mid);
        let root = raw("root", &[mid_id]);

        writer.create_object(&stream(), leaf).await.unwrap();
        writer
            .create_objects_batched_and_no_closures(&stream(), vec![mid.clone()])
            .await
            .unwrap();

        let repair = writer
            .create_objects_with_mode(&stream(), vec![mid], ClosureMode::Compute)
            .await
            .unwrap();
        assert_eq!(repair.objects_inserted, 0);
        assert_eq!(repair.objects_completed, 1);
        assert_eq!(repair.closures_written, 1);
        assert!(repair.wrote_anything());

        let root_id = writer.create_object(&stream(), root).await.unwrap();
        assert_eq!(
            closure_map(&store, root_id).await,
            BTreeMap::from([(mid_id, 1), (leaf_id, 2)])
        );
        assert_eq!(store.len().unwrap(), 3);
    }

    #[tokio::test]
    async fn leaves_written_without_closures_are_complete() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let leaf_id = hash(&leaf);
        writer
            .create_objects_batched_and_no_closures(&stream(), vec![leaf])
            .await
            .unwrap();

        let parent = writer
            .create_object(&stream(), raw("parent", &[leaf_id]))
            .await
            .unwrap();
        assert_eq!(closure_map(&store, parent).await, BTreeMap::from([(leaf_id, 1)]));
    }

    #[tokio::test]
    async fn row_level_writes_need_reingest_before_parents() {
        let (_, writer) = setup();
        let leaf = raw("leaf", &[]);
        let leaf_id = hash(&leaf);
        let row = writer.prepare_object(&stream(), leaf.clone()).unwrap();
        writer.store_objects(vec![row]).await.unwrap();

        let err = writer
            .create_object(&stream(), raw("parent", &[leaf_id]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ObjectError::Validation(ValidationError::IncompleteClosure { child, .. }) if child == leaf_id
        ));

        assert!(writer
            .create_objects_batched(&stream(), vec![leaf], ClosureMode::Compute)
            .await
            .unwrap());
        writer
            .create_object(&stream(), raw("parent", &[leaf_id]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn batched_reports_whether_it_wrote() {
        let (_, writer) = setup();
        let batch = vec![raw("a", &[]), raw("b", &[])];
        assert!(writer
            .create_objects_batched(&stream(), batch.clone(), ClosureMode::Compute)
            .await
            .unwrap());
        assert!(!writer
            .create_objects_batched(&stream(), batch, ClosureMode::Compute)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn store_objects_conflicts_on_existing_id() {
        let (store, writer) = setup();
        let object = writer.prepare_object(&stream(), raw("a", &[])).unwrap();
        let rows = writer.store_objects(vec![object.clone()]).await.unwrap();
        assert_eq!(rows.len(), 1);

        let fresh = writer.prepare_object(&stream(), raw("b", &[])).unwrap();
        let err = writer
            .store_objects(vec![fresh, object])
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::Storage(StoreError::Conflict(_))));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn store_if_not_found_is_idempotent() {
        let (store, writer) = setup();
        let a = writer.prepare_object(&stream(), raw("a", &[])).unwrap();
        let b = writer.prepare_object(&stream(), raw("b", &[])).unwrap();

        writer.store_single_object_if_not_found(a.clone()).await.unwrap();
        writer
            .store_objects_if_not_found(vec![a.clone(), b.clone(), b])
            .await
            .unwrap();
        writer.store_objects_if_not_found(vec![a]).await.unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn store_closures_keeps_minimum() {
        let (store, writer) = setup();
        let (p, c) = (ContentHash::from_bytes(b"p"), ContentHash::from_bytes(b"c"));
        writer
            .store_closures_if_not_found(vec![ClosureEntry::new(stream(), p, c, 3)])
            .await
            .unwrap();
        writer
            .store_closures_if_not_found(vec![
                ClosureEntry::new(stream(), p, c, 5),
                ClosureEntry::new(stream(), p, c, 2),
            ])
            .await
            .unwrap();
        assert_eq!(closure_map(&store, p).await, BTreeMap::from([(c, 2)]));
        assert_eq!(store.closure_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_double_insert_stores_once() {
        let (store, writer) = setup();
        let leaf = raw("leaf", &[]);
        let branch = raw("branch", &[hash(&leaf)]);
        let branch_id = hash(&branch);
        let batch = vec![leaf, branch];

        let mut handles = Vec::new();
        for _ in 0..8 {
            let writer = writer.clone();
            let batch = batch.clone();
            handles.push(tokio::spawn(async move {
                writer.create_objects(&stream(), batch).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.closure_len().unwrap(), 1);
        let children = store
            .get_children(&stream(), &branch_id, ChildrenQuery::default())
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn invalid_pre_assigned_id_is_rejected() {
        let (store, writer) = setup();
        let object = InsertableSpeckleObject::from(raw("a", &[])).with_id("zz");
        let err = writer.create_objects(&stream(), vec![object]).await.unwrap_err();
        assert!(err.is_validation());
        assert!(store.is_empty().unwrap());
    }
}

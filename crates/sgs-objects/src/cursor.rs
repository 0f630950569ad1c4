use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sgs_store::{ObjectRepository, PageRequest, SpeckleObject};
use sgs_types::{ContentHash, StreamId};
use tracing::trace;

use crate::error::{ObjectError, ObjectResult, ValidationError};

/// Opaque resume position of a stream scan.
///
/// Tokens render as plain strings so they can be handed to clients and
/// parsed back later.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorToken(ContentHash);

impl CursorToken {
    fn position(&self) -> ContentHash {
        self.0
    }
}

impl fmt::Debug for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CursorToken({})", self.0.short_hex())
    }
}

impl fmt::Display for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

impl FromStr for CursorToken {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentHash::from_hex(s)
            .map(Self)
            .map_err(|_| ValidationError::InvalidCursor(s.to_string()).into())
    }
}

/// Options for [`ObjectReader::get_batched_stream_objects`].
///
/// [`ObjectReader::get_batched_stream_objects`]: crate::reader::ObjectReader::get_batched_stream_objects
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchedSelectOptions {
    /// Rows per batch. Defaults and limits come from the cursor config.
    pub batch_size: Option<usize>,
    /// Start strictly after this position.
    pub after: Option<CursorToken>,
}

impl BatchedSelectOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn after(mut self, token: CursorToken) -> Self {
        self.after = Some(token);
        self
    }
}

/// One non-empty page of a stream scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectBatch {
    pub objects: Vec<SpeckleObject>,
    token: CursorToken,
}

impl ObjectBatch {
    /// Position of the last row; resumes a scan right after this batch.
    pub fn token(&self) -> CursorToken {
        self.token
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn into_objects(self) -> Vec<SpeckleObject> {
        self.objects
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bound {
    /// No batch pulled yet.
    Unset,
    /// Scan ends at this id, inclusive.
    Until(ContentHash),
    Exhausted,
}

/// Pull-based scan over a stream's objects in id order.
///
/// Batches never overlap and leave no gaps. The upper bound is the largest
/// id present when the first batch is pulled, so objects inserted during a
/// scan with larger ids are not visited. Once [`next_batch`](Self::next_batch)
/// returns `None` it keeps doing so. Dropping the cursor needs no cleanup.
pub struct StreamCursor {
    repo: Arc<dyn ObjectRepository>,
    stream_id: StreamId,
    batch_size: usize,
    after: Option<ContentHash>,
    bound: Bound,
    batches: usize,
}

impl StreamCursor {
    pub(crate) fn new(
        repo: Arc<dyn ObjectRepository>,
        stream_id: StreamId,
        batch_size: usize,
        after: Option<CursorToken>,
    ) -> Self {
        Self {
            repo,
            stream_id,
            batch_size: batch_size.max(1),
            after: after.map(|t| t.position()),
            bound: Bound::Unset,
            batches: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches yielded so far.
    pub fn batches_yielded(&self) -> usize {
        self.batches
    }

    pub fn is_exhausted(&self) -> bool {
        self.bound == Bound::Exhausted
    }

    /// Fetch the next batch, or `None` when the scan is complete.
    ///
    /// A failed fetch leaves the position unchanged, so the call can be
    /// repeated.
    pub async fn next_batch(&mut self) -> ObjectResult<Option<ObjectBatch>> {
        let until = match self.bound {
            Bound::Exhausted => return Ok(None),
            Bound::Until(until) => until,
            Bound::Unset => match self.repo.max_object_id(&self.stream_id).await? {
                Some(max) => {
                    self.bound = Bound::Until(max);
                    max
                }
                None => {
                    self.bound = Bound::Exhausted;
                    return Ok(None);
                }
            },
        };

        let page = PageRequest {
            after: self.after,
            until: Some(until),
            limit: self.batch_size,
        };
        let objects = self.repo.page_objects(&self.stream_id, &page).await?;

        let Some(last) = objects.last().map(|o| o.id) else {
            self.bound = Bound::Exhausted;
            return Ok(None);
        };
        if last == until || objects.len() < self.batch_size {
            self.bound = Bound::Exhausted;
        }
        self.after = Some(last);
        self.batches += 1;

        trace!(
            stream = %self.stream_id,
            batch = self.batches,
            rows = objects.len(),
            last = %last.short_hex(),
            "cursor batch"
        );

        Ok(Some(ObjectBatch {
            objects,
            token: CursorToken(last),
        }))
    }

    /// Drain the remaining batches into one vector.
    pub async fn collect_remaining(mut self) -> ObjectResult<Vec<SpeckleObject>> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            all.extend(batch.into_objects());
        }
        Ok(all)
    }
}

impl fmt::Debug for StreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCursor")
            .field("stream_id", &self.stream_id)
            .field("batch_size", &self.batch_size)
            .field("after", &self.after)
            .field("bound", &self.bound)
            .field("batches", &self.batches)
            .finish()
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sgs_crypto::{ContentHasher, ID_KEY};
use sgs_store::SpeckleObject;
use sgs_types::{ContentHash, StreamId};

use crate::error::{ObjectResult, ValidationError};

/// An object as submitted for ingest: a payload plus the ids of the objects
/// it references.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSpeckleObject {
    pub data: Value,
    #[serde(default)]
    pub children: Vec<ContentHash>,
}

impl RawSpeckleObject {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ContentHash>) -> Self {
        self.children = children;
        self
    }
}

/// A [`RawSpeckleObject`] that may already know its id, in which case
/// hashing is skipped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsertableSpeckleObject {
    #[serde(default)]
    pub id: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub children: Vec<ContentHash>,
}

impl InsertableSpeckleObject {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl From<RawSpeckleObject> for InsertableSpeckleObject {
    fn from(raw: RawSpeckleObject) -> Self {
        Self {
            id: None,
            data: raw.data,
            children: raw.children,
        }
    }
}

/// Whether an ingest derives closure entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClosureMode {
    /// Validate references and write closure entries with the objects.
    #[default]
    Compute,
    /// Write object rows only. References are not checked.
    Skip,
}

/// Validate a raw stream id.
pub fn parse_stream_id(raw: &str) -> ObjectResult<StreamId> {
    StreamId::new(raw).map_err(|e| ValidationError::InvalidStreamId(e).into())
}

/// Compute the content hash of a raw object.
pub fn assign_id(hasher: &ContentHasher, raw: &RawSpeckleObject) -> ObjectResult<ContentHash> {
    Ok(hasher.hash_payload(&raw.data)?)
}

/// An object whose id is settled and whose payload carries it.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PreparedObject {
    pub id: ContentHash,
    pub data: Value,
    pub children: Vec<ContentHash>,
}

impl PreparedObject {
    /// Settle the id (parse the pre-assigned one or hash the payload) and
    /// stamp it into the payload.
    pub fn prepare(hasher: &ContentHasher, object: InsertableSpeckleObject) -> ObjectResult<Self> {
        let InsertableSpeckleObject {
            id,
            mut data,
            children,
        } = object;

        let id = match id {
            Some(raw) => ContentHash::from_hex(&raw)
                .map_err(|source| ValidationError::InvalidObjectId { id: raw, source })?,
            None => hasher.hash_payload(&data)?,
        };

        let fields = data.as_object_mut().ok_or_else(|| {
            ValidationError::MalformedPayload("payload must be a JSON object".into())
        })?;
        fields.insert(ID_KEY.to_string(), Value::String(id.to_hex()));

        Ok(Self { id, data, children })
    }

    pub fn into_object(self, stream_id: &StreamId) -> SpeckleObject {
        SpeckleObject::new(stream_id.clone(), self.id, self.data)
    }
}

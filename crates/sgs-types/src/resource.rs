//! Typed resource references.
//!
//! Collaborating services (comments, activity, viewer state) point at stream
//! resources with a loose `(resourceType, resourceId)` pair. [`ResourceTarget`]
//! is the closed form: one case per resource kind, each carrying only the
//! identifier that is valid for that kind.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::object::ContentHash;
use crate::stream::StreamId;

/// The kind tag of a [`ResourceTarget`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Stream,
    Commit,
    Object,
    Comment,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Commit => "commit",
            Self::Object => "object",
            Self::Comment => "comment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "commit" => Ok(Self::Commit),
            "object" => Ok(Self::Object),
            "comment" => Ok(Self::Comment),
            other => Err(TypeError::UnknownResourceType(other.to_string())),
        }
    }
}

/// A reference to one resource inside a stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "resourceType", rename_all = "lowercase")]
pub enum ResourceTarget {
    Stream {
        #[serde(rename = "resourceId")]
        stream_id: StreamId,
    },
    Commit {
        #[serde(rename = "resourceId")]
        commit_id: String,
    },
    Object {
        #[serde(rename = "resourceId")]
        object_id: ContentHash,
    },
    Comment {
        #[serde(rename = "resourceId")]
        comment_id: String,
    },
}

impl ResourceTarget {
    /// Build a target from the untyped `(resourceType, resourceId)` pair.
    pub fn from_parts(resource_type: &str, resource_id: &str) -> Result<Self, TypeError> {
        let kind: ResourceKind = resource_type.parse()?;
        if resource_id.trim().is_empty() {
            return Err(TypeError::MissingResourceField {
                kind: kind.as_str(),
                field: "resource id",
            });
        }
        Ok(match kind {
            ResourceKind::Stream => Self::Stream {
                stream_id: StreamId::new(resource_id)?,
            },
            ResourceKind::Commit => Self::Commit {
                commit_id: resource_id.to_string(),
            },
            ResourceKind::Object => Self::Object {
                object_id: ContentHash::from_hex(resource_id)?,
            },
            ResourceKind::Comment => Self::Comment {
                comment_id: resource_id.to_string(),
            },
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Stream { .. } => ResourceKind::Stream,
            Self::Commit { .. } => ResourceKind::Commit,
            Self::Object { .. } => ResourceKind::Object,
            Self::Comment { .. } => ResourceKind::Comment,
        }
    }

    /// The object id, if this target names an object.
    pub fn object_id(&self) -> Option<ContentHash> {
        match self {
            Self::Object { object_id } => Some(*object_id),
            _ => None,
        }
    }
}

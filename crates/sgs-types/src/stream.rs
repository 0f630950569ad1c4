use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of a stream, the collaboration namespace that owns objects.
///
/// Stream ids are opaque to the store. They must be non-empty and fit in
/// [`StreamId::MAX_LEN`] bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    pub const MAX_LEN: usize = 255;

    /// Validate and wrap a stream id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TypeError::EmptyStreamId);
        }
        if id.len() > Self::MAX_LEN {
            return Err(TypeError::StreamIdTooLong {
                len: id.len(),
                max: Self::MAX_LEN,
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for StreamId {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_id() {
        let id = StreamId::new("a1b2c3d4e5").unwrap();
        assert_eq!(id.as_str(), "a1b2c3d4e5");
        assert_eq!(id.to_string(), "a1b2c3d4e5");
    }

    #[test]
    fn rejects_blank() {
        assert_eq!(StreamId::new("").unwrap_err(), TypeError::EmptyStreamId);
        assert_eq!(StreamId::new("   ").unwrap_err(), TypeError::EmptyStreamId);
    }

    #[test]
    fn rejects_oversized() {
        let err = StreamId::new("x".repeat(StreamId::MAX_LEN + 1)).unwrap_err();
        assert!(matches!(err, TypeError::StreamIdTooLong { .. }));
    }

    #[test]
    fn deserialize_validates() {
        let ok: StreamId = serde_json::from_str("\"s1\"").unwrap();
        assert_eq!(ok.as_str(), "s1");
        assert!(serde_json::from_str::<StreamId>("\"\"").is_err());
    }
}

use std::sync::Arc;

use sgs_store::{open_repository, CursorConfig, InMemoryObjectStore, ObjectRepository, StoreConfig};

use crate::dedupe::DedupeGate;
use crate::error::ObjectResult;
use crate::reader::ObjectReader;
use crate::writer::ObjectWriter;

/// Entry point of the object store.
///
/// Owns the repository handle and hands out the writer, reader and dedupe
/// gate that share it. Cloning is cheap.
#[derive(Clone)]
pub struct ObjectService {
    repo: Arc<dyn ObjectRepository>,
    writer: ObjectWriter,
    reader: ObjectReader,
}

impl ObjectService {
    pub fn new(repo: Arc<dyn ObjectRepository>) -> Self {
        Self::with_cursor_config(repo, CursorConfig::default())
    }

    pub fn with_cursor_config(repo: Arc<dyn ObjectRepository>, cursor: CursorConfig) -> Self {
        Self {
            writer: ObjectWriter::new(repo.clone()),
            reader: ObjectReader::with_cursor_config(repo.clone(), cursor),
            repo,
        }
    }

    /// A service over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryObjectStore::new()))
    }

    /// Open the configured backend.
    pub async fn from_config(config: &StoreConfig) -> ObjectResult<Self> {
        let repo = open_repository(config).await?;
        Ok(Self::with_cursor_config(repo, config.cursor))
    }

    pub fn repository(&self) -> &Arc<dyn ObjectRepository> {
        &self.repo
    }

    pub fn writer(&self) -> &ObjectWriter {
        &self.writer
    }

    pub fn reader(&self) -> &ObjectReader {
        &self.reader
    }

    pub fn gate(&self) -> &DedupeGate {
        self.writer.gate()
    }
}

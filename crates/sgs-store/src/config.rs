use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryObjectStore;
use crate::traits::ObjectRepository;

/// Largest accepted `insert_chunk_size`. Postgres allows 65535 bind
/// parameters per statement and an object row takes five.
pub const MAX_INSERT_CHUNK_SIZE: usize = 65_535 / 5;

/// Store configuration, usually loaded from a TOML file.
///
/// ```toml
/// insert_chunk_size = 500
///
/// [backend]
/// kind = "postgres"
/// database_url = "postgres://localhost/objects"
///
/// [cursor]
/// default_batch_size = 100
/// max_batch_size = 1000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    pub cursor: CursorConfig,
    /// Rows per INSERT statement. Every statement of a batch still runs in
    /// one transaction.
    pub insert_chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            cursor: CursorConfig::default(),
            insert_chunk_size: 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory,
    Postgres {
        database_url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        #[serde(default = "default_connect_timeout_secs")]
        connect_timeout_secs: u64,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Batch sizing for stream cursors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub default_batch_size: usize,
    pub max_batch_size: usize,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 100,
            max_batch_size: 1000,
        }
    }
}

impl CursorConfig {
    /// Resolve a requested batch size: the default when absent, clamped to
    /// `[1, max_batch_size]` otherwise.
    pub fn resolve(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_batch_size)
            .clamp(1, self.max_batch_size.max(1))
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.insert_chunk_size == 0 {
            return Err(StoreError::Config("insert_chunk_size must be positive".into()));
        }
        if self.insert_chunk_size > MAX_INSERT_CHUNK_SIZE {
            return Err(StoreError::Config(format!(
                "insert_chunk_size {} exceeds {MAX_INSERT_CHUNK_SIZE}",
                self.insert_chunk_size
            )));
        }
        if self.cursor.max_batch_size == 0 || self.cursor.default_batch_size == 0 {
            return Err(StoreError::Config("cursor batch sizes must be positive".into()));
        }
        if self.cursor.default_batch_size > self.cursor.max_batch_size {
            return Err(StoreError::Config(format!(
                "default_batch_size {} exceeds max_batch_size {}",
                self.cursor.default_batch_size, self.cursor.max_batch_size
            )));
        }
        if let BackendConfig::Postgres {
            database_url,
            max_connections,
            ..
        } = &self.backend
        {
            if database_url.trim().is_empty() {
                return Err(StoreError::Config("database_url must not be empty".into()));
            }
            if *max_connections == 0 {
                return Err(StoreError::Config("max_connections must be positive".into()));
            }
        }
        Ok(())
    }
}

/// Build the repository named by the configuration.
pub async fn open_repository(config: &StoreConfig) -> StoreResult<Arc<dyn ObjectRepository>> {
    config.validate()?;
    match &config.backend {
        BackendConfig::Memory => {
            info!("opening in-memory object store");
            Ok(Arc::new(InMemoryObjectStore::new()))
        }
        #[cfg(feature = "postgres")]
        BackendConfig::Postgres {
            database_url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = crate::postgres::PostgresObjectStore::connect_with_options(
                database_url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?
            .with_chunk_size(config.insert_chunk_size);
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        BackendConfig::Postgres { .. } => Err(StoreError::Config(
            "postgres backend requested but the `postgres` feature is not enabled".into(),
        )),
    }
}

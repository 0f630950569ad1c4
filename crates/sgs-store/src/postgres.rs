//! PostgreSQL adapter for the object and closure relations.
//!
//! Duplicate-write safety is delegated to Postgres itself. Object rows are
//! written with an `ON CONFLICT` clause that at most raises
//! `closures_complete` from false to true. Closure rows use an
//! `ON CONFLICT DO UPDATE` that only ever lowers `min_depth`. Every
//! [`WriteBatch`] runs in one transaction.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sgs_types::{ContentHash, StreamId};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use crate::config::MAX_INSERT_CHUNK_SIZE;
use crate::error::{StoreError, StoreResult};
use crate::object::{
    merge_min, ChildrenQuery, ClosureEntry, InsertMode, PageRequest, RowId, SpeckleObject,
    WriteBatch, WriteOutcome,
};
use crate::traits::ObjectRepository;

/// Rows per multi-row INSERT. Five binds per object row keeps a full chunk
/// well under the 65535 bind parameter limit.
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;

/// PostgreSQL-backed object repository.
#[derive(Clone)]
pub struct PostgresObjectStore {
    pool: PgPool,
    chunk_size: usize,
}

impl PostgresObjectStore {
    /// Connect to PostgreSQL and initialize the schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        info!(max_connections, "connected to postgres object store");
        Self::from_pool(pool).await
    }

    /// Create the adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self {
            pool,
            chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Override the number of rows per INSERT statement.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_INSERT_CHUNK_SIZE);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                row_id BIGINT GENERATED ALWAYS AS IDENTITY,
                stream_id TEXT NOT NULL,
                id TEXT COLLATE "C" NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                closures_complete BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (stream_id, id)
            )
            "#,
            r#"
            ALTER TABLE objects
                ADD COLUMN IF NOT EXISTS closures_complete BOOLEAN NOT NULL DEFAULT FALSE
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS object_closures (
                stream_id TEXT NOT NULL,
                parent TEXT COLLATE "C" NOT NULL,
                child TEXT COLLATE "C" NOT NULL,
                min_depth INTEGER NOT NULL CHECK (min_depth >= 1),
                PRIMARY KEY (stream_id, parent, child)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS object_closures_child_idx
                ON object_closures (stream_id, child)
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectRepository for PostgresObjectStore {
    async fn get_object(
        &self,
        stream_id: &StreamId,
        id: &ContentHash,
    ) -> StoreResult<Option<SpeckleObject>> {
        let row = sqlx::query(
            r#"
            SELECT stream_id, id, data, created_at
              FROM objects
             WHERE stream_id = $1 AND id = $2
            "#,
        )
        .bind(stream_id.as_str())
        .bind(id.to_hex())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(object_from_row).transpose()
    }

    async fn get_objects(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<Vec<SpeckleObject>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT stream_id, id, data, created_at
              FROM objects
             WHERE stream_id = $1 AND id = ANY($2)
             ORDER BY id
            "#,
        )
        .bind(stream_id.as_str())
        .bind(hex_ids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(object_from_row).collect()
    }

    async fn existing_object_ids(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<HashSet<ContentHash>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query("SELECT id FROM objects WHERE stream_id = $1 AND id = ANY($2)")
            .bind(stream_id.as_str())
            .bind(hex_ids(ids))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(|row| hash_column(row, "id")).collect()
    }

    async fn incomplete_object_ids(
        &self,
        stream_id: &StreamId,
        ids: &[ContentHash],
    ) -> StoreResult<HashSet<ContentHash>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT id FROM objects
             WHERE stream_id = $1 AND id = ANY($2) AND NOT closures_complete
            "#,
        )
        .bind(stream_id.as_str())
        .bind(hex_ids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(|row| hash_column(row, "id")).collect()
    }

    async fn closure_depths(
        &self,
        stream_id: &StreamId,
        pairs: &[(ContentHash, ContentHash)],
    ) -> StoreResult<HashMap<(ContentHash, ContentHash), u32>> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        let parents: Vec<String> = pairs.iter().map(|(p, _)| p.to_hex()).collect();
        let children: Vec<String> = pairs.iter().map(|(_, c)| c.to_hex()).collect();
        let rows = sqlx::query(
            r#"
            SELECT c.parent, c.child, c.min_depth
              FROM object_closures c
              JOIN UNNEST($2::text[], $3::text[]) AS k(parent, child)
                ON c.parent = k.parent AND c.child = k.child
             WHERE c.stream_id = $1
            "#,
        )
        .bind(stream_id.as_str())
        .bind(parents)
        .bind(children)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let parent = hash_column(row, "parent")?;
                let child = hash_column(row, "child")?;
                Ok(((parent, child), depth_column(row)?))
            })
            .collect()
    }

    async fn get_closures(
        &self,
        stream_id: &StreamId,
        object_ids: &[ContentHash],
    ) -> StoreResult<Vec<ClosureEntry>> {
        if object_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT parent, child, min_depth
              FROM object_closures
             WHERE stream_id = $1 AND parent = ANY($2)
             ORDER BY parent, child
            "#,
        )
        .bind(stream_id.as_str())
        .bind(hex_ids(object_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(ClosureEntry {
                    stream_id: stream_id.clone(),
                    object_id: hash_column(row, "parent")?,
                    child_id: hash_column(row, "child")?,
                    min_depth: depth_column(row)?,
                })
            })
            .collect()
    }

    async fn get_children(
        &self,
        stream_id: &StreamId,
        object_id: &ContentHash,
        query: ChildrenQuery,
    ) -> StoreResult<Vec<SpeckleObject>> {
        let max_depth = query.max_depth.map(to_i32).transpose()?;
        let limit = query.limit.map(to_i64).transpose()?;
        let rows = sqlx::query(
            r#"
            SELECT o.stream_id, o.id, o.data, o.created_at
              FROM object_closures c
              JOIN objects o ON o.stream_id = c.stream_id AND o.id = c.child
             WHERE c.stream_id = $1
               AND c.parent = $2
               AND ($3::int IS NULL OR c.min_depth <= $3)
             ORDER BY c.min_depth, c.child
             LIMIT $4
            "#,
        )
        .bind(stream_id.as_str())
        .bind(object_id.to_hex())
        .bind(max_depth)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(object_from_row).collect()
    }

    async fn page_objects(
        &self,
        stream_id: &StreamId,
        page: &PageRequest,
    ) -> StoreResult<Vec<SpeckleObject>> {
        let rows = sqlx::query(
            r#"
            SELECT stream_id, id, data, created_at
              FROM objects
             WHERE stream_id = $1
               AND ($2::text IS NULL OR id > $2)
               AND ($3::text IS NULL OR id <= $3)
             ORDER BY id
             LIMIT $4
            "#,
        )
        .bind(stream_id.as_str())
        .bind(page.after.map(|id| id.to_hex()))
        .bind(page.until.map(|id| id.to_hex()))
        .bind(to_i64(page.limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(object_from_row).collect()
    }

    async fn max_object_id(&self, stream_id: &StreamId) -> StoreResult<Option<ContentHash>> {
        let row = sqlx::query("SELECT MAX(id) AS id FROM objects WHERE stream_id = $1")
            .bind(stream_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let id: Option<String> = row
            .try_get("id")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        id.map(|hex| parse_hash(&hex)).transpose()
    }

    async fn count_objects(&self, stream_id: &StreamId) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM objects WHERE stream_id = $1")
            .bind(stream_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(n.max(0) as u64)
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<WriteOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut outcome = WriteOutcome::default();

        // Take row locks in key order so overlapping batches cannot deadlock.
        let mut objects = batch.objects;
        objects.sort_by(|a, b| (&a.stream_id, a.id).cmp(&(&b.stream_id, b.id)));

        for chunk in objects.chunks(self.chunk_size) {
            let mut insert: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO objects (stream_id, id, data, created_at, closures_complete) ",
            );
            insert.push_values(chunk, |mut row, object| {
                row.push_bind(object.stream_id.as_str().to_owned())
                    .push_bind(object.id.to_hex())
                    .push_bind(object.data.clone())
                    .push_bind(object.created_at)
                    .push_bind(batch.complete.contains(&object.key()));
            });
            if batch.mode == InsertMode::IfAbsent {
                // Only a row that gains its closure is touched. Rows skipped
                // by the WHERE clause are not returned at all.
                insert.push(
                    " ON CONFLICT (stream_id, id) DO UPDATE SET closures_complete = TRUE \
                     WHERE EXCLUDED.closures_complete AND NOT objects.closures_complete",
                );
            }
            // `xmax = 0` holds for freshly inserted rows only.
            insert.push(" RETURNING row_id, (xmax = 0) AS inserted");

            // A strict conflict aborts here; dropping `tx` rolls back.
            let rows = insert
                .build()
                .fetch_all(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            for row in rows {
                let inserted: bool = row
                    .try_get("inserted")
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                if !inserted {
                    outcome.rows_completed += 1;
                    continue;
                }
                let row_id: i64 = row
                    .try_get("row_id")
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                outcome.row_ids.push(RowId(row_id));
            }
        }

        let closures = merge_min(batch.closures);
        for chunk in closures.chunks(self.chunk_size) {
            let mut upsert: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO object_closures (stream_id, parent, child, min_depth) ",
            );
            let mut bind_error = None;
            upsert.push_values(chunk, |mut row, entry| {
                let depth = to_i32(entry.min_depth).unwrap_or_else(|e| {
                    bind_error = Some(e);
                    i32::MAX
                });
                row.push_bind(entry.stream_id.as_str().to_owned())
                    .push_bind(entry.object_id.to_hex())
                    .push_bind(entry.child_id.to_hex())
                    .push_bind(depth);
            });
            if let Some(err) = bind_error {
                return Err(err);
            }
            upsert.push(
                " ON CONFLICT (stream_id, parent, child) DO UPDATE \
                 SET min_depth = LEAST(object_closures.min_depth, EXCLUDED.min_depth) \
                 WHERE object_closures.min_depth > EXCLUDED.min_depth",
            );

            let result = upsert
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            outcome.closures_written += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            inserted = outcome.objects_inserted(),
            completed = outcome.rows_completed,
            closures = outcome.closures_written,
            "applied write batch"
        );
        Ok(outcome)
    }
}

fn object_from_row(row: PgRow) -> StoreResult<SpeckleObject> {
    let stream: String = row
        .try_get("stream_id")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let id = hash_column(&row, "id")?;
    let data: Value = row
        .try_get("data")
        .map_err(|e| StoreError::Serialization(format!("object {id} payload: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let stream_id = StreamId::new(stream.clone()).map_err(|e| StoreError::CorruptRow {
        key: format!("{stream}/{id}"),
        reason: e.to_string(),
    })?;
    Ok(SpeckleObject {
        id,
        stream_id,
        data,
        created_at,
    })
}

fn hash_column(row: &PgRow, column: &str) -> StoreResult<ContentHash> {
    let hex: String = row
        .try_get(column)
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    parse_hash(&hex)
}

fn parse_hash(hex: &str) -> StoreResult<ContentHash> {
    ContentHash::from_hex(hex).map_err(|e| StoreError::CorruptRow {
        key: hex.to_string(),
        reason: e.to_string(),
    })
}

fn depth_column(row: &PgRow) -> StoreResult<u32> {
    let depth: i32 = row
        .try_get("min_depth")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    u32::try_from(depth).map_err(|_| StoreError::CorruptRow {
        key: "object_closures.min_depth".to_string(),
        reason: format!("negative depth {depth}"),
    })
}

fn hex_ids(ids: &[ContentHash]) -> Vec<String> {
    ids.iter().map(ContentHash::to_hex).collect()
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("limit too large".to_string()))
}

fn to_i32(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::InvalidInput("depth too large".to_string()))
}

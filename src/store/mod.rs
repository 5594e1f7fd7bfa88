//! Document collection contract consumed by the chunk store and sessions.
//!
//! The blob layer never talks to a database directly. It sees a pair of
//! typed collections per bucket, opened through a [`Database`]. Two backends
//! ship with the crate: [`memory::MemoryDatabase`] and
//! [`sqlite::SqliteDatabase`].

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Chunk, FileQuery, FileRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("duplicate key `{key}` in collection `{collection}`")]
    Duplicate { collection: String, key: String },
    #[error("failed to decode stored document: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Entry point handing out the collections behind a bucket.
#[async_trait]
pub trait Database: Send + Sync {
    /// Prepare `<bucket>.files` and `<bucket>.chunks` and return handles to them.
    ///
    /// Must be safe to call more than once for the same bucket.
    async fn open_bucket(
        &self,
        bucket: &str,
    ) -> StoreResult<(Arc<dyn FilesCollection>, Arc<dyn ChunksCollection>)>;
}

/// Collection of finalized file records.
#[async_trait]
pub trait FilesCollection: Send + Sync {
    /// Insert a record. Fails with [`StoreError::Duplicate`] if the id exists.
    async fn insert_one(&self, record: &FileRecord) -> StoreResult<()>;

    /// First record matching `query`; most recent `upload_date` first.
    async fn find_one(&self, query: &FileQuery) -> StoreResult<Option<FileRecord>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        self.find_one(&FileQuery::ById(id)).await
    }

    /// Remove the record with `id`. Returns the number of records removed.
    async fn delete_one(&self, id: Uuid) -> StoreResult<u64>;

    /// Remove every record matching `query`.
    async fn delete_many(&self, query: &FileQuery) -> StoreResult<u64>;

    /// Ids of every stored record.
    async fn ids(&self) -> StoreResult<Vec<Uuid>>;
}

/// Collection of chunks, addressed by `(files_id, n)`.
#[async_trait]
pub trait ChunksCollection: Send + Sync {
    /// Insert a chunk. Fails with [`StoreError::Duplicate`] if `(files_id, n)` exists.
    async fn insert_one(&self, chunk: &Chunk) -> StoreResult<()>;

    async fn find_one(&self, files_id: Uuid, n: u32) -> StoreResult<Option<Chunk>>;

    /// Remove every chunk owned by `files_id`.
    async fn delete_many(&self, files_id: Uuid) -> StoreResult<u64>;

    async fn count(&self, files_id: Uuid) -> StoreResult<u64>;

    /// Chunk numbers stored for `files_id`, ascending.
    async fn numbers(&self, files_id: Uuid) -> StoreResult<Vec<u32>>;

    /// Distinct owners of at least one chunk.
    async fn file_ids(&self) -> StoreResult<Vec<Uuid>>;

    /// Every chunk owner paired with the time its most recent chunk was
    /// inserted. Backends stamp chunks themselves on insert.
    async fn last_written(&self) -> StoreResult<Vec<(Uuid, DateTime<Utc>)>>;
}

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use gridfile::{
    BlobSession, BucketRegistry, Chunk,
    store::{
        ChunksCollection, Database, FilesCollection, StoreError, StoreResult,
        memory::MemoryDatabase, sqlite::SqliteDatabase,
    },
};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

/// Deterministic content: byte `i` is `i % 251`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Feed `data` as frames of `frame` bytes, so frame edges never line up
/// with chunk edges.
pub fn framed(data: &[u8], frame: usize) -> impl Stream<Item = io::Result<Bytes>> + Send + use<> {
    let frames: Vec<io::Result<Bytes>> = data
        .chunks(frame.max(1))
        .map(|f| Ok(Bytes::copy_from_slice(f)))
        .collect();
    futures::stream::iter(frames)
}

pub async fn memory_session() -> BlobSession {
    BucketRegistry::new(Arc::new(MemoryDatabase::new()))
        .session("fs.files")
        .await
        .unwrap()
}

pub async fn sqlite_session() -> BlobSession {
    let db = SqliteDatabase::in_memory().await.unwrap();
    BucketRegistry::new(Arc::new(db))
        .session("fs.files")
        .await
        .unwrap()
}

/// Wraps a database and lets tests observe or break its chunks collection.
pub struct Instrumented {
    inner: MemoryDatabase,
    pub chunk_reads: Arc<AtomicUsize>,
    pub fail_after_inserts: Option<usize>,
}

impl Instrumented {
    pub fn new() -> Self {
        Self {
            inner: MemoryDatabase::new(),
            chunk_reads: Arc::new(AtomicUsize::new(0)),
            fail_after_inserts: None,
        }
    }

    pub fn failing_after(inserts: usize) -> Self {
        Self {
            fail_after_inserts: Some(inserts),
            ..Self::new()
        }
    }
}

#[async_trait]
impl Database for Instrumented {
    async fn open_bucket(
        &self,
        bucket: &str,
    ) -> StoreResult<(Arc<dyn FilesCollection>, Arc<dyn ChunksCollection>)> {
        let (files, chunks) = self.inner.open_bucket(bucket).await?;
        let chunks = InstrumentedChunks {
            inner: chunks,
            reads: self.chunk_reads.clone(),
            inserts: AtomicUsize::new(0),
            fail_after: self.fail_after_inserts,
        };
        Ok((files, Arc::new(chunks)))
    }
}

struct InstrumentedChunks {
    inner: Arc<dyn ChunksCollection>,
    reads: Arc<AtomicUsize>,
    inserts: AtomicUsize,
    fail_after: Option<usize>,
}

#[async_trait]
impl ChunksCollection for InstrumentedChunks {
    async fn insert_one(&self, chunk: &Chunk) -> StoreResult<()> {
        let done = self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| done >= limit) {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.insert_one(chunk).await
    }

    async fn find_one(&self, files_id: Uuid, n: u32) -> StoreResult<Option<Chunk>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_one(files_id, n).await
    }

    async fn delete_many(&self, files_id: Uuid) -> StoreResult<u64> {
        self.inner.delete_many(files_id).await
    }

    async fn count(&self, files_id: Uuid) -> StoreResult<u64> {
        self.inner.count(files_id).await
    }

    async fn numbers(&self, files_id: Uuid) -> StoreResult<Vec<u32>> {
        self.inner.numbers(files_id).await
    }

    async fn file_ids(&self) -> StoreResult<Vec<Uuid>> {
        self.inner.file_ids().await
    }

    async fn last_written(&self) -> StoreResult<Vec<(Uuid, DateTime<Utc>)>> {
        self.inner.last_written().await
    }
}

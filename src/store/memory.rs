//! In-process backend holding collections in ordered maps.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{ChunksCollection, Database, FilesCollection, StoreError, StoreResult};
use crate::models::{
    Chunk, FileQuery, FileRecord,
    bucket::{CHUNKS_SUFFIX, FILES_SUFFIX},
};

/// Database keeping every bucket in memory for the lifetime of the value.
#[derive(Default)]
pub struct MemoryDatabase {
    buckets: Mutex<HashMap<String, (Arc<MemoryFiles>, Arc<MemoryChunks>)>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn open_bucket(
        &self,
        bucket: &str,
    ) -> StoreResult<(Arc<dyn FilesCollection>, Arc<dyn ChunksCollection>)> {
        let mut buckets = self.buckets.lock().await;
        let (files, chunks) = buckets
            .entry(bucket.to_string())
            .or_insert_with(|| {
                (
                    Arc::new(MemoryFiles::new(format!("{bucket}{FILES_SUFFIX}"))),
                    Arc::new(MemoryChunks::new(format!("{bucket}{CHUNKS_SUFFIX}"))),
                )
            })
            .clone();
        Ok((files, chunks))
    }
}

pub struct MemoryFiles {
    name: String,
    records: RwLock<HashMap<Uuid, FileRecord>>,
}

impl MemoryFiles {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl FilesCollection for MemoryFiles {
    async fn insert_one(&self, record: &FileRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate {
                collection: self.name.clone(),
                key: record.id.to_string(),
            });
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_one(&self, query: &FileQuery) -> StoreResult<Option<FileRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| query.matches(r))
            .max_by_key(|r| r.upload_date)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn delete_one(&self, id: Uuid) -> StoreResult<u64> {
        Ok(self.records.write().await.remove(&id).map_or(0, |_| 1))
    }

    async fn delete_many(&self, query: &FileQuery) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !query.matches(r));
        Ok((before - records.len()) as u64)
    }

    async fn ids(&self) -> StoreResult<Vec<Uuid>> {
        Ok(self.records.read().await.keys().copied().collect())
    }
}

pub struct MemoryChunks {
    name: String,
    chunks: RwLock<BTreeMap<(Uuid, u32), (Bytes, DateTime<Utc>)>>,
}

impl MemoryChunks {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunks: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl ChunksCollection for MemoryChunks {
    async fn insert_one(&self, chunk: &Chunk) -> StoreResult<()> {
        let mut chunks = self.chunks.write().await;
        let key = (chunk.files_id, chunk.n);
        if chunks.contains_key(&key) {
            return Err(StoreError::Duplicate {
                collection: self.name.clone(),
                key: format!("{}/{}", chunk.files_id, chunk.n),
            });
        }
        chunks.insert(key, (chunk.data.clone(), Utc::now()));
        Ok(())
    }

    async fn find_one(&self, files_id: Uuid, n: u32) -> StoreResult<Option<Chunk>> {
        let chunks = self.chunks.read().await;
        Ok(chunks
            .get(&(files_id, n))
            .map(|(data, _)| Chunk::new(files_id, n, data.clone())))
    }

    async fn delete_many(&self, files_id: Uuid) -> StoreResult<u64> {
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|(owner, _), _| *owner != files_id);
        Ok((before - chunks.len()) as u64)
    }

    async fn count(&self, files_id: Uuid) -> StoreResult<u64> {
        let chunks = self.chunks.read().await;
        Ok(chunks.range((files_id, 0)..=(files_id, u32::MAX)).count() as u64)
    }

    async fn numbers(&self, files_id: Uuid) -> StoreResult<Vec<u32>> {
        let chunks = self.chunks.read().await;
        Ok(chunks
            .range((files_id, 0)..=(files_id, u32::MAX))
            .map(|((_, n), _)| *n)
            .collect())
    }

    async fn file_ids(&self) -> StoreResult<Vec<Uuid>> {
        let chunks = self.chunks.read().await;
        let owners: BTreeSet<Uuid> = chunks.keys().map(|(owner, _)| *owner).collect();
        Ok(owners.into_iter().collect())
    }

    async fn last_written(&self) -> StoreResult<Vec<(Uuid, DateTime<Utc>)>> {
        let chunks = self.chunks.read().await;
        let mut latest: BTreeMap<Uuid, DateTime<Utc>> = BTreeMap::new();
        for ((owner, _), (_, written_at)) in chunks.iter() {
            let entry = latest.entry(*owner).or_insert(*written_at);
            *entry = (*entry).max(*written_at);
        }
        Ok(latest.into_iter().collect())
    }
}

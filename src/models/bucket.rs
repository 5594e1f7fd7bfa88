//! Represents a bucket: a files collection paired with its chunks collection.

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};
use uuid::Uuid;

use crate::{services::chunk_store::ChunkStore, store::FilesCollection};

/// Suffix every files collection name must carry.
pub const FILES_SUFFIX: &str = ".files";

/// Suffix of the chunks collection paired with a files collection.
pub const CHUNKS_SUFFIX: &str = ".chunks";

/// A resolved bucket.
///
/// Buckets are built once per files collection by the
/// [`BucketRegistry`](crate::services::bucket_registry::BucketRegistry) and
/// shared behind an `Arc` for the rest of the process.
pub struct Bucket {
    /// Shared prefix, e.g. `attachment` for `attachment.files`.
    pub name: String,

    /// Name of the collection holding file records.
    pub files_collection: String,

    /// Name of the collection holding chunks.
    pub chunks_collection: String,

    pub(crate) files: Arc<dyn FilesCollection>,
    pub(crate) chunks: ChunkStore,

    /// Ids of uploads currently running through this process.
    uploads: Mutex<HashSet<Uuid>>,
}

impl Bucket {
    pub fn new(
        name: impl Into<String>,
        files: Arc<dyn FilesCollection>,
        chunks: ChunkStore,
    ) -> Self {
        let name = name.into();
        Self {
            files_collection: format!("{name}{FILES_SUFFIX}"),
            chunks_collection: format!("{name}{CHUNKS_SUFFIX}"),
            name,
            files,
            chunks,
            uploads: Mutex::new(HashSet::new()),
        }
    }

    /// Collection holding this bucket's file records.
    pub fn files(&self) -> &Arc<dyn FilesCollection> {
        &self.files
    }

    /// Chunk store over this bucket's chunks collection.
    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunks
    }

    /// Ids of uploads still running in this process.
    pub fn uploads_in_flight(&self) -> HashSet<Uuid> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mark `id` as uploading until the returned guard drops. Returns `None`
    /// if an upload with that id is already running.
    pub(crate) fn begin_upload(&self, id: Uuid) -> Option<UploadGuard<'_>> {
        let mut uploads = self.uploads.lock().unwrap_or_else(PoisonError::into_inner);
        if !uploads.insert(id) {
            return None;
        }
        Some(UploadGuard { bucket: self, id })
    }
}

/// Keeps an upload id registered as in flight; releases it on drop, which
/// also covers uploads whose future is dropped mid-way.
pub(crate) struct UploadGuard<'a> {
    bucket: &'a Bucket,
    id: Uuid,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.bucket
            .uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("files_collection", &self.files_collection)
            .field("chunks_collection", &self.chunks_collection)
            .finish()
    }
}

/// Derive the bucket name from a files collection name.
///
/// Returns `None` if the name does not end in [`FILES_SUFFIX`] or the prefix
/// before it is empty.
pub fn bucket_name_for(collection_name: &str) -> Option<&str> {
    collection_name
        .strip_suffix(FILES_SUFFIX)
        .filter(|prefix| !prefix.is_empty())
}

//! Process-wide cache of resolved buckets, keyed by files collection name.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::{Mutex, OnceCell};
use tracing::info;

use crate::{
    errors::{GridError, GridResult},
    models::bucket::{Bucket, bucket_name_for},
    services::{blob_session::BlobSession, chunk_store::ChunkStore},
    store::Database,
};

/// Resolves files collection names to shared [`Bucket`]s.
///
/// Each name gets its own `OnceCell`, so concurrent first-use callers wait on
/// a single construction instead of racing to build duplicates. A failed
/// construction leaves the cell empty and the next caller retries.
pub struct BucketRegistry {
    db: Arc<dyn Database>,
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<Bucket>>>>>,
    constructed: AtomicUsize,
}

impl BucketRegistry {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            cells: Mutex::new(HashMap::new()),
            constructed: AtomicUsize::new(0),
        }
    }

    /// Return the cached bucket for `collection_name`, building it on first use.
    ///
    /// The name must end in `.files`; anything else fails with
    /// [`GridError::InvalidCollectionName`] before the cache is touched.
    pub async fn resolve(&self, collection_name: &str) -> GridResult<Arc<Bucket>> {
        let name = bucket_name_for(collection_name)
            .ok_or_else(|| GridError::InvalidCollectionName(collection_name.to_string()))?;

        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(collection_name.to_string()).or_default().clone()
        };

        let bucket = cell
            .get_or_try_init(|| async {
                let (files, chunks) = self.db.open_bucket(name).await?;
                self.constructed.fetch_add(1, Ordering::SeqCst);
                info!(bucket = %name, collection = %collection_name, "resolved bucket");
                Ok::<_, GridError>(Arc::new(Bucket::new(name, files, ChunkStore::new(chunks))))
            })
            .await?;

        Ok(bucket.clone())
    }

    /// Resolve `collection_name` and open a session over it.
    pub async fn session(&self, collection_name: &str) -> GridResult<BlobSession> {
        Ok(BlobSession::new(self.resolve(collection_name).await?))
    }

    /// Number of buckets built since this registry was created.
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    /// Number of collection names currently cached.
    pub async fn cached(&self) -> usize {
        self.cells
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Drop every cached bucket. Sessions already handed out keep working.
    pub async fn teardown(&self) {
        let mut cells = self.cells.lock().await;
        let dropped = cells.len();
        cells.clear();
        info!(buckets = dropped, "bucket registry torn down");
    }
}

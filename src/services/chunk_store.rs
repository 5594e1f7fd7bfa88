//! src/services/chunk_store.rs
//!
//! ChunkStore maps one logical file onto an ordered run of fixed-size
//! chunks inside a chunks collection. Writes are strictly sequential, so
//! chunk numbers come out contiguous without a sort step at read time.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, stream};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    errors::{GridError, GridResult},
    models::Chunk,
    store::{ChunksCollection, StoreError},
};

/// Summary returned when a [`ChunkWriter`] is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenChunks {
    pub chunks: u32,
    pub bytes: u64,
}

#[derive(Clone)]
pub struct ChunkStore {
    chunks: Arc<dyn ChunksCollection>,
}

impl ChunkStore {
    pub fn new(chunks: Arc<dyn ChunksCollection>) -> Self {
        Self { chunks }
    }

    /// The backing chunks collection.
    pub fn collection(&self) -> &Arc<dyn ChunksCollection> {
        &self.chunks
    }

    /// Open a sink that splits incoming frames into `chunk_size` chunks for `file_id`.
    pub fn open_sequential_writer(
        &self,
        file_id: Uuid,
        chunk_size: u32,
    ) -> GridResult<ChunkWriter> {
        if chunk_size == 0 {
            return Err(GridError::InvalidChunkSize);
        }
        let chunk_size = chunk_size as usize;
        Ok(ChunkWriter {
            chunks: self.chunks.clone(),
            files_id: file_id,
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            next_n: 0,
            bytes: 0,
            failed: None,
        })
    }

    /// Open a forward-only reader over the chunks of `file_id`.
    ///
    /// When `expected_len` is non-zero, chunk 0 is fetched up front and a
    /// miss is reported as [`GridError::ChunksNotFound`].
    pub async fn open_sequential_reader(
        &self,
        file_id: Uuid,
        expected_len: u64,
    ) -> GridResult<ChunkReader> {
        let first = if expected_len > 0 {
            let chunk = self
                .chunks
                .find_one(file_id, 0)
                .await?
                .ok_or(GridError::ChunksNotFound(file_id))?;
            Some(chunk)
        } else {
            None
        };

        Ok(ChunkReader {
            chunks: self.chunks.clone(),
            files_id: file_id,
            first,
            next_n: 0,
            done: false,
        })
    }

    /// Remove every chunk of `file_id`. Returns how many were removed; repeat
    /// calls return 0.
    pub async fn delete_chunks(&self, file_id: Uuid) -> GridResult<u64> {
        let removed = self.chunks.delete_many(file_id).await?;
        if removed > 0 {
            info!(file_id = %file_id, chunks = removed, "deleted chunks");
        }
        Ok(removed)
    }

    pub async fn count_chunks(&self, file_id: Uuid) -> GridResult<u64> {
        Ok(self.chunks.count(file_id).await?)
    }

    /// Stored chunk numbers for `file_id`, ascending.
    pub async fn chunk_numbers(&self, file_id: Uuid) -> GridResult<Vec<u32>> {
        Ok(self.chunks.numbers(file_id).await?)
    }

    /// Ids of every file owning at least one chunk.
    pub async fn file_ids(&self) -> GridResult<Vec<Uuid>> {
        Ok(self.chunks.file_ids().await?)
    }

    /// Each chunk owner with the insert time of its newest chunk.
    pub async fn last_written(&self) -> GridResult<Vec<(Uuid, DateTime<Utc>)>> {
        Ok(self.chunks.last_written().await?)
    }
}

/// Buffers written bytes and persists one chunk each time the buffer fills.
///
/// Chunk `n` is only inserted after the insert of chunk `n - 1` returned.
/// After a failed insert the writer is poisoned: every later `write` or
/// `close` fails. Nothing is rolled back; chunks already stored stay until
/// the caller deletes them.
pub struct ChunkWriter {
    chunks: Arc<dyn ChunksCollection>,
    files_id: Uuid,
    chunk_size: usize,
    buffer: BytesMut,
    next_n: u32,
    bytes: u64,
    /// Set once an insert fails.
    failed: Option<String>,
}

impl ChunkWriter {
    pub fn files_id(&self) -> Uuid {
        self.files_id
    }

    /// Bytes persisted so far, excluding what is still buffered.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub async fn write(&mut self, mut frame: &[u8]) -> GridResult<()> {
        self.ensure_usable()?;
        while !frame.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(frame.len());
            self.buffer.extend_from_slice(&frame[..take]);
            frame = &frame[take..];

            if self.buffer.len() == self.chunk_size {
                self.flush_chunk().await?;
            }
        }
        Ok(())
    }

    /// Flush the short final chunk, if any, and report what was written.
    pub async fn close(mut self) -> GridResult<WrittenChunks> {
        self.ensure_usable()?;
        if !self.buffer.is_empty() {
            self.flush_chunk().await?;
        }
        Ok(WrittenChunks {
            chunks: self.next_n,
            bytes: self.bytes,
        })
    }

    fn ensure_usable(&self) -> GridResult<()> {
        match &self.failed {
            Some(reason) => Err(GridError::Storage(StoreError::Backend(format!(
                "chunk {} of {} was not stored: {reason}",
                self.next_n, self.files_id
            )))),
            None => Ok(()),
        }
    }

    async fn flush_chunk(&mut self) -> GridResult<()> {
        let data = self.buffer.split().freeze();
        let len = data.len() as u64;
        let chunk = Chunk::new(self.files_id, self.next_n, data);
        if let Err(err) = self.chunks.insert_one(&chunk).await {
            warn!(file_id = %self.files_id, n = self.next_n, error = %err, "chunk insert failed");
            self.failed = Some(err.to_string());
            return Err(err.into());
        }

        debug!(file_id = %self.files_id, n = self.next_n, bytes = len, "wrote chunk");
        self.next_n += 1;
        self.bytes += len;
        self.buffer.reserve(self.chunk_size);
        Ok(())
    }
}

/// Lazy, forward-only reader yielding one chunk's bytes per step in
/// ascending chunk order. Holds at most one chunk at a time.
pub struct ChunkReader {
    chunks: Arc<dyn ChunksCollection>,
    files_id: Uuid,
    first: Option<Chunk>,
    next_n: u32,
    done: bool,
}

impl ChunkReader {
    pub fn files_id(&self) -> Uuid {
        self.files_id
    }

    /// Fetch the next chunk, or `None` once the run of chunks ends.
    pub async fn next_frame(&mut self) -> GridResult<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }

        let chunk = match self.first.take() {
            Some(chunk) => Some(chunk),
            None => self.chunks.find_one(self.files_id, self.next_n).await?,
        };

        let Some(chunk) = chunk else {
            self.done = true;
            return Ok(None);
        };

        if chunk.is_empty() {
            self.done = true;
            return Err(GridError::integrity(
                self.files_id,
                format!("chunk {} is empty", chunk.n),
            ));
        }

        debug!(file_id = %self.files_id, n = chunk.n, bytes = chunk.len(), "read chunk");
        self.next_n += 1;
        Ok(Some(chunk.data))
    }

    /// Turn the reader into a stream. The next chunk is fetched only when the
    /// consumer polls for it.
    pub fn into_stream(self) -> impl Stream<Item = GridResult<Bytes>> + Send {
        stream::try_unfold(self, |mut reader| async move {
            let next = reader.next_frame().await?;
            Ok::<_, GridError>(next.map(|frame| (frame, reader)))
        })
    }
}

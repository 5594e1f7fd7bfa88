//! src/services/blob_session.rs
//!
//! BlobSession uploads, downloads and deletes whole files within one
//! bucket. Uploads stream through an MD5 accumulator into a `ChunkWriter`
//! and only write the file record once every chunk is stored. Downloads
//! pull one chunk at a time and wait for the sink before pulling the next.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use serde_json::Value;
use std::{collections::HashSet, future::Future, io, sync::Arc};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::DEFAULT_CHUNK_SIZE,
    errors::{GridError, GridResult},
    models::{Bucket, FileQuery, FileRecord, PendingFile},
};

/// Options for a single upload.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    /// Use this id instead of generating one. Must not already exist.
    pub id: Option<Uuid>,
    pub filename: String,
    /// Defaults to [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: Option<u32>,
    pub content_type: Option<String>,
    pub metadata: Option<Value>,
    pub aliases: Vec<String>,
    pub cancel: Option<CancellationToken>,
}

impl UploadOptions {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct DownloadOptions {
    pub cancel: Option<CancellationToken>,
}

/// Handle for transfers against one bucket. Cheap to clone; each call to
/// `upload` or `download` is an independent transfer.
#[derive(Clone, Debug)]
pub struct BlobSession {
    bucket: Arc<Bucket>,
}

impl BlobSession {
    pub fn new(bucket: Arc<Bucket>) -> Self {
        Self { bucket }
    }

    pub fn bucket(&self) -> &Arc<Bucket> {
        &self.bucket
    }

    /// Stream `source` into the bucket and finalize a file record.
    ///
    /// - Splits the stream into `chunk_size` chunks, written in order.
    /// - Computes MD5 and length while streaming.
    /// - Inserts the record only after the last chunk is stored.
    ///
    /// On failure no record is written; chunks already stored are left for
    /// [`find_orphans`](Self::find_orphans) to report.
    pub async fn upload<S>(&self, source: S, options: UploadOptions) -> GridResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let chunk_size = options.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(GridError::InvalidChunkSize);
        }

        let id = match options.id {
            Some(id) => {
                if self.bucket.files.find_by_id(id).await?.is_some() {
                    return Err(GridError::AlreadyExists(id));
                }
                id
            }
            None => Uuid::new_v4(),
        };
        let Some(_in_flight) = self.bucket.begin_upload(id) else {
            return Err(GridError::AlreadyExists(id));
        };

        let cancel = options.cancel.as_ref();
        let pending = PendingFile {
            id,
            filename: options.filename.clone(),
            chunk_size,
            content_type: options.content_type.clone(),
            metadata: options.metadata.clone(),
            aliases: options.aliases.clone(),
        };
        debug!(file_id = %id, filename = %pending.filename, chunk_size, "upload opened");

        let mut writer = self.bucket.chunks.open_sequential_writer(id, chunk_size)?;
        let mut digest = Context::new();
        let mut length: u64 = 0;

        pin_mut!(source);
        let streamed: GridResult<()> = async {
            while let Some(frame) = until_cancelled(cancel, source.next()).await? {
                let frame = frame.map_err(GridError::Upload)?;
                digest.consume(&frame);
                length += frame.len() as u64;
                until_cancelled(cancel, writer.write(&frame)).await??;
            }
            Ok(())
        }
        .await;

        if let Err(err) = streamed {
            warn!(
                file_id = %id,
                bytes = length,
                error = %err,
                "upload aborted; stored chunks are orphaned"
            );
            return Err(err);
        }

        let written = match until_cancelled(cancel, writer.close()).await.and_then(|r| r) {
            Ok(written) => written,
            Err(err) => {
                warn!(
                    file_id = %id,
                    bytes = length,
                    error = %err,
                    "upload aborted; stored chunks are orphaned"
                );
                return Err(err);
            }
        };

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            warn!(file_id = %id, "upload cancelled before finalize");
            return Err(GridError::Cancelled);
        }

        let record = pending.finalize(length, format!("{:x}", digest.compute()));
        self.bucket.files.insert_one(&record).await?;

        info!(
            file_id = %record.id,
            filename = %record.filename,
            length = record.length,
            chunks = written.chunks,
            md5 = %record.md5,
            "upload finalized"
        );
        Ok(record)
    }

    /// Upload an in-memory buffer.
    pub async fn upload_bytes(
        &self,
        data: impl Into<Bytes>,
        options: UploadOptions,
    ) -> GridResult<FileRecord> {
        let data = data.into();
        self.upload(futures::stream::iter([Ok(data)]), options).await
    }

    /// Stream the file `file_id` into `sink`.
    pub async fn download<W>(&self, file_id: Uuid, sink: W) -> GridResult<FileRecord>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.download_with(file_id, sink, DownloadOptions::default())
            .await
    }

    /// Stream the file `file_id` into `sink`, honouring `options`.
    ///
    /// - Fails with `FileNotFound` if no record exists.
    /// - Writes each chunk fully before fetching the next.
    /// - Verifies byte count and MD5 against the record.
    ///
    /// A sink error aborts immediately with [`GridError::Download`].
    pub async fn download_with<W>(
        &self,
        file_id: Uuid,
        mut sink: W,
        options: DownloadOptions,
    ) -> GridResult<FileRecord>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let cancel = options.cancel.as_ref();
        let record = self
            .bucket
            .files
            .find_by_id(file_id)
            .await?
            .ok_or(GridError::FileNotFound(file_id))?;

        let mut reader = until_cancelled(
            cancel,
            self.bucket
                .chunks
                .open_sequential_reader(file_id, record.length),
        )
        .await??;

        let mut digest = Context::new();
        let mut total: u64 = 0;
        while let Some(frame) = until_cancelled(cancel, reader.next_frame()).await?? {
            total += frame.len() as u64;
            if total > record.length {
                warn!(
                    file_id = %file_id,
                    expected = record.length,
                    "stored chunks exceed recorded length"
                );
                return Err(GridError::integrity(
                    file_id,
                    format!("expected {} bytes, read at least {}", record.length, total),
                ));
            }
            digest.consume(&frame);
            until_cancelled(cancel, sink.write_all(&frame))
                .await?
                .map_err(GridError::Download)?;
        }
        until_cancelled(cancel, sink.flush())
            .await?
            .map_err(GridError::Download)?;

        if total != record.length {
            warn!(
                file_id = %file_id,
                expected = record.length,
                read = total,
                "download came up short"
            );
            return Err(GridError::integrity(
                file_id,
                format!("expected {} bytes, read {}", record.length, total),
            ));
        }

        let md5 = format!("{:x}", digest.compute());
        if md5 != record.md5 {
            warn!(file_id = %file_id, expected = %record.md5, actual = %md5, "digest mismatch");
            return Err(GridError::integrity(
                file_id,
                format!("expected md5 {}, computed {}", record.md5, md5),
            ));
        }

        info!(file_id = %file_id, bytes = total, "download complete");
        Ok(record)
    }

    /// Open a lazy stream over the raw chunks of `file_id`.
    ///
    /// Each item is one chunk; the next chunk is fetched when the consumer
    /// polls. Unlike [`download`](Self::download) this does not verify length
    /// or digest.
    pub async fn open_download_stream(
        &self,
        file_id: Uuid,
    ) -> GridResult<(FileRecord, impl Stream<Item = GridResult<Bytes>> + Send)> {
        let record = self
            .bucket
            .files
            .find_by_id(file_id)
            .await?
            .ok_or(GridError::FileNotFound(file_id))?;
        let reader = self
            .bucket
            .chunks
            .open_sequential_reader(file_id, record.length)
            .await?;
        Ok((record, reader.into_stream()))
    }

    /// Delete the file `file_id`: chunks first, then the record.
    ///
    /// Returns the record as it was before deletion, or `None` if no record
    /// exists. Calling it again for the same id returns `None`.
    pub async fn delete(&self, file_id: Uuid) -> GridResult<Option<FileRecord>> {
        let Some(record) = self.bucket.files.find_by_id(file_id).await? else {
            debug!(file_id = %file_id, "delete: no such file");
            return Ok(None);
        };

        // Not atomic: a failure between these two calls leaves a record
        // whose chunks are gone.
        let chunks = self.bucket.chunks.delete_chunks(file_id).await?;
        self.bucket.files.delete_one(file_id).await?;

        info!(file_id = %file_id, filename = %record.filename, chunks, "file deleted");
        Ok(Some(record))
    }

    pub async fn find_by_id(&self, file_id: Uuid) -> GridResult<Option<FileRecord>> {
        Ok(self.bucket.files.find_by_id(file_id).await?)
    }

    pub async fn find_one(&self, query: &FileQuery) -> GridResult<Option<FileRecord>> {
        Ok(self.bucket.files.find_one(query).await?)
    }

    /// Find the first record matching `query` and delete it with its chunks.
    pub async fn find_one_and_delete(&self, query: &FileQuery) -> GridResult<Option<FileRecord>> {
        match self.find_one(query).await? {
            Some(record) => self.delete(record.id).await,
            None => Ok(None),
        }
    }

    /// Ids that own chunks but have no file record, left behind by aborted
    /// or crashed uploads.
    ///
    /// An id is only reported once no chunk was written for it in the last
    /// `min_idle`, and never while an upload with that id is running in this
    /// process. Uploads in other processes are only covered by `min_idle`, so
    /// pick it well above the longest pause a live upload can take before
    /// reclaiming with `ChunkStore::delete_chunks`.
    pub async fn find_orphans(&self, min_idle: Duration) -> GridResult<Vec<Uuid>> {
        let cutoff = Utc::now()
            .checked_sub_signed(min_idle)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let in_flight = self.bucket.uploads_in_flight();
        let finalized: HashSet<Uuid> = self.bucket.files.ids().await?.into_iter().collect();
        let mut orphans: Vec<Uuid> = self
            .bucket
            .chunks
            .last_written()
            .await?
            .into_iter()
            .filter(|(id, written_at)| {
                *written_at <= cutoff && !finalized.contains(id) && !in_flight.contains(id)
            })
            .map(|(id, _)| id)
            .collect();
        orphans.sort();
        Ok(orphans)
    }
}

/// Run `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> GridResult<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(GridError::Cancelled),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

//! Chunked blob storage over a document collection.
//!
//! A file is split into fixed-size chunks stored as independent documents,
//! plus one file record written once the upload completes. Reads pull the
//! chunks back in order as a lazy byte stream.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gridfile::{BucketRegistry, UploadOptions, store::sqlite::SqliteDatabase};
//!
//! # async fn run() -> gridfile::GridResult<()> {
//! let db = SqliteDatabase::connect("sqlite://./data/gridfile.db", 5).await?;
//! let registry = BucketRegistry::new(Arc::new(db));
//! let session = registry.session("fs.files").await?;
//!
//! let record = session
//!     .upload_bytes(&b"hello"[..], UploadOptions::new("hello.txt"))
//!     .await?;
//! let mut out = Vec::<u8>::new();
//! session.download(record.id, &mut out).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod store;

pub use errors::{ErrorKind, GridError, GridResult};
pub use models::{Bucket, Chunk, FileQuery, FileRecord, PendingFile};
pub use services::{
    blob_session::{BlobSession, DownloadOptions, UploadOptions},
    bucket_registry::BucketRegistry,
    chunk_store::{ChunkReader, ChunkStore, ChunkWriter, WrittenChunks},
};

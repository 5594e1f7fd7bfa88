//! Core data models for the chunked blob store.
//!
//! A finalized file is described by a [`FileRecord`]; its bytes live in an
//! ordered run of [`Chunk`]s. Both are scoped to a [`Bucket`], the pair of
//! collections sharing a name prefix.

pub mod bucket;
pub mod chunk;
pub mod file_record;

pub use bucket::Bucket;
pub use chunk::Chunk;
pub use file_record::{FileQuery, FileRecord, PendingFile};

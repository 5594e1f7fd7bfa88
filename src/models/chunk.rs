//! Represents one stored segment of a file's bytes.

use bytes::Bytes;
use uuid::Uuid;

/// A single chunk of file data.
///
/// Chunks of one file share `files_id` and are numbered contiguously from
/// zero. Every chunk holds exactly `chunk_size` bytes except possibly the
/// last, which may be shorter but never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Id of the owning file record.
    pub files_id: Uuid,

    /// Zero-based position of this chunk within the file.
    pub n: u32,

    /// Raw bytes.
    pub data: Bytes,
}

impl Chunk {
    pub fn new(files_id: Uuid, n: u32, data: Bytes) -> Self {
        Self { files_id, n, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

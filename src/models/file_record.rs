//! Represents a stored file and its in-flight upload state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata document for one finalized file.
///
/// Records are only ever written once all chunks are durable and the digest
/// is known, so `length`, `upload_date` and `md5` are always populated. The
/// `content_type`, `metadata` and `aliases` fields are passthrough attributes
/// and have no effect on how chunks are stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Unique id, assigned when the upload opened.
    pub id: Uuid,

    /// Caller-supplied name. Not required to be unique.
    pub filename: String,

    /// Total size in bytes.
    pub length: u64,

    /// Bytes per chunk for this file.
    pub chunk_size: u32,

    /// When the upload was finalized.
    pub upload_date: DateTime<Utc>,

    /// Lower-case hex MD5 of the full content.
    pub md5: String,

    pub content_type: Option<String>,

    /// Arbitrary application payload.
    pub metadata: Option<Value>,

    pub aliases: Vec<String>,
}

impl FileRecord {
    /// Alias for `upload_date`.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.upload_date
    }

    /// Number of chunks a complete copy of this file occupies.
    pub fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.length.div_ceil(u64::from(self.chunk_size))
    }
}

/// An upload that has been opened but not yet finalized.
///
/// Never persisted: a pending file that is dropped without being finalized
/// leaves at most orphaned chunks behind, never a half-written record.
#[derive(Clone, Debug)]
pub struct PendingFile {
    pub id: Uuid,
    pub filename: String,
    pub chunk_size: u32,
    pub content_type: Option<String>,
    pub metadata: Option<Value>,
    pub aliases: Vec<String>,
}

impl PendingFile {
    /// Finalize into a record, stamping the upload date.
    pub fn finalize(self, length: u64, md5: String) -> FileRecord {
        FileRecord {
            id: self.id,
            filename: self.filename,
            length,
            chunk_size: self.chunk_size,
            upload_date: Utc::now(),
            md5,
            content_type: self.content_type,
            metadata: self.metadata,
            aliases: self.aliases,
        }
    }
}

/// Filter accepted by file lookups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileQuery {
    /// Match a single id.
    ById(Uuid),
    /// Match by filename; the most recently uploaded revision wins.
    ByFilename(String),
    /// Match every record.
    Any,
}

impl FileQuery {
    pub fn matches(&self, record: &FileRecord) -> bool {
        match self {
            Self::ById(id) => record.id == *id,
            Self::ByFilename(name) => record.filename == *name,
            Self::Any => true,
        }
    }
}

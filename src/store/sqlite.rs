//! SQLite backend built on `sqlx`.
//!
//! All buckets share one `files` and one `chunks` table; rows are partitioned
//! by a `collection` column holding the full collection name
//! (`<bucket>.files` / `<bucket>.chunks`).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use tracing::debug;
use uuid::Uuid;

use super::{ChunksCollection, Database, FilesCollection, StoreError, StoreResult};
use crate::models::{
    Chunk, FileQuery, FileRecord,
    bucket::{CHUNKS_SUFFIX, FILES_SUFFIX},
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct SqliteDatabase {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteDatabase {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Connect to `url`, creating the database file if it does not exist.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Private in-memory database. Pinned to a single connection that is
    /// never recycled, since every SQLite memory connection is its own database.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Create tables and indexes. Idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn open_bucket(
        &self,
        bucket: &str,
    ) -> StoreResult<(Arc<dyn FilesCollection>, Arc<dyn ChunksCollection>)> {
        self.migrate().await?;
        let files = SqliteFiles {
            db: self.db.clone(),
            collection: format!("{bucket}{FILES_SUFFIX}"),
        };
        let chunks = SqliteChunks {
            db: self.db.clone(),
            collection: format!("{bucket}{CHUNKS_SUFFIX}"),
        };
        Ok((Arc::new(files), Arc::new(chunks)))
    }
}

#[derive(FromRow)]
struct FileRow {
    id: Uuid,
    filename: String,
    length: i64,
    chunk_size: i64,
    upload_date: DateTime<Utc>,
    md5: String,
    content_type: Option<String>,
    metadata: Option<String>,
    aliases: String,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = StoreError;

    fn try_from(row: FileRow) -> StoreResult<Self> {
        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(FileRecord {
            id: row.id,
            filename: row.filename,
            length: row.length as u64,
            chunk_size: row.chunk_size as u32,
            upload_date: row.upload_date,
            md5: row.md5,
            content_type: row.content_type,
            metadata,
            aliases: serde_json::from_str(&row.aliases)?,
        })
    }
}

pub struct SqliteFiles {
    db: Arc<SqlitePool>,
    collection: String,
}

impl SqliteFiles {
    fn push_filter<'a>(&'a self, builder: &mut QueryBuilder<'a, Sqlite>, query: &'a FileQuery) {
        builder.push(" WHERE collection = ");
        builder.push_bind(&self.collection);
        match query {
            FileQuery::ById(id) => {
                builder.push(" AND id = ");
                builder.push_bind(*id);
            }
            FileQuery::ByFilename(name) => {
                builder.push(" AND filename = ");
                builder.push_bind(name);
            }
            FileQuery::Any => {}
        }
    }
}

#[async_trait]
impl FilesCollection for SqliteFiles {
    async fn insert_one(&self, record: &FileRecord) -> StoreResult<()> {
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let aliases = serde_json::to_string(&record.aliases)?;

        let result = sqlx::query(
            "INSERT INTO files (
                collection, id, filename, length, chunk_size, upload_date,
                md5, content_type, metadata, aliases
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.collection)
        .bind(record.id)
        .bind(&record.filename)
        .bind(record.length as i64)
        .bind(i64::from(record.chunk_size))
        .bind(record.upload_date)
        .bind(&record.md5)
        .bind(record.content_type.as_deref())
        .bind(metadata)
        .bind(aliases)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate {
                collection: self.collection.clone(),
                key: record.id.to_string(),
            }),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn find_one(&self, query: &FileQuery) -> StoreResult<Option<FileRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, filename, length, chunk_size, upload_date, md5, \
             content_type, metadata, aliases FROM files",
        );
        self.push_filter(&mut builder, query);
        builder.push(" ORDER BY upload_date DESC LIMIT 1");

        let row: Option<FileRow> = builder.build_query_as().fetch_optional(&*self.db).await?;
        row.map(FileRecord::try_from).transpose()
    }

    async fn delete_one(&self, id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM files WHERE collection = ? AND id = ?")
            .bind(&self.collection)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_many(&self, query: &FileQuery) -> StoreResult<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM files");
        self.push_filter(&mut builder, query);
        let result = builder.build().execute(&*self.db).await?;
        Ok(result.rows_affected())
    }

    async fn ids(&self) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM files WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&*self.db)
            .await?;
        Ok(ids)
    }
}

pub struct SqliteChunks {
    db: Arc<SqlitePool>,
    collection: String,
}

#[async_trait]
impl ChunksCollection for SqliteChunks {
    async fn insert_one(&self, chunk: &Chunk) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO chunks (collection, files_id, n, data, written_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.collection)
        .bind(chunk.files_id)
        .bind(i64::from(chunk.n))
        .bind(chunk.data.as_ref())
        .bind(Utc::now().timestamp_millis())
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate {
                collection: self.collection.clone(),
                key: format!("{}/{}", chunk.files_id, chunk.n),
            }),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn find_one(&self, files_id: Uuid, n: u32) -> StoreResult<Option<Chunk>> {
        let data = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT data FROM chunks WHERE collection = ? AND files_id = ? AND n = ?",
        )
        .bind(&self.collection)
        .bind(files_id)
        .bind(i64::from(n))
        .fetch_optional(&*self.db)
        .await?;
        Ok(data.map(|data| Chunk::new(files_id, n, Bytes::from(data))))
    }

    async fn delete_many(&self, files_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE collection = ? AND files_id = ?")
            .bind(&self.collection)
            .bind(files_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, files_id: Uuid) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chunks WHERE collection = ? AND files_id = ?",
        )
        .bind(&self.collection)
        .bind(files_id)
        .fetch_one(&*self.db)
        .await?;
        Ok(count as u64)
    }

    async fn numbers(&self, files_id: Uuid) -> StoreResult<Vec<u32>> {
        let numbers = sqlx::query_scalar::<_, i64>(
            "SELECT n FROM chunks WHERE collection = ? AND files_id = ? ORDER BY n ASC",
        )
        .bind(&self.collection)
        .bind(files_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(numbers.into_iter().map(|n| n as u32).collect())
    }

    async fn file_ids(&self) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT files_id FROM chunks WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&*self.db)
        .await?;
        Ok(ids)
    }

    async fn last_written(&self) -> StoreResult<Vec<(Uuid, DateTime<Utc>)>> {
        let rows = sqlx::query_as::<_, (Uuid, i64)>(
            "SELECT files_id, MAX(written_at) FROM chunks WHERE collection = ? GROUP BY files_id",
        )
        .bind(&self.collection)
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter()
            .map(|(id, millis)| {
                DateTime::from_timestamp_millis(millis)
                    .map(|at| (id, at))
                    .ok_or_else(|| StoreError::Backend(format!("bad chunk timestamp {millis}")))
            })
            .collect()
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

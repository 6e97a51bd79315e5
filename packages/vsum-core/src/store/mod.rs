//! Persistence store: the durable mapping backing uploads, cache entries
//! and job records. Backed by a single-connection `sqlx::SqlitePool`,
//! which gives the "process-wide mutex over one connection" serialization
//! the concurrency model calls for via the pool's own connection-acquire
//! queue rather than a hand-rolled mutex around every query.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::cache::key::SourceType;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct UploadRow {
    pub file_id: String,
    pub original_name: String,
    pub size: i64,
    pub mime_type: String,
    pub file_type: String,
    pub stored_path: String,
    pub file_hash: Option<String>,
    pub created_at: i64,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Pending => "pending",
            CacheStatus::Running => "running",
            CacheStatus::Completed => "completed",
            CacheStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => CacheStatus::Running,
            "completed" => CacheStatus::Completed,
            "failed" => CacheStatus::Failed,
            _ => CacheStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntryRow {
    pub cache_key: String,
    pub source_type: String,
    pub source_ref: String,
    pub source_name: Option<String>,
    pub status: String,
    pub profile_version: String,
    pub summary_text: Option<String>,
    pub bundle_path: String,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed: i64,
}

#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: String,
    pub cache_key: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub error: Option<String>,
}

/// Port the cache service, upload storage and job queue depend on.
/// Kept as a trait (rather than a concrete `SqliteStore` type) so tests
/// can swap in an in-memory fake, matching the teacher's own
/// port/adapter split between its orchestration and storage crates.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn upsert_upload(&self, row: &UploadRow) -> Result<()>;
    async fn get_upload(&self, file_id: &str) -> Result<Option<UploadRow>>;
    async fn delete_upload(&self, file_id: &str) -> Result<()>;
    async fn list_uploads(&self) -> Result<Vec<UploadRow>>;

    async fn get_cache_entry(&self, cache_key: &str) -> Result<Option<CacheEntryRow>>;
    async fn insert_cache_entry(&self, row: &CacheEntryRow) -> Result<()>;
    async fn update_cache_entry(&self, row: &CacheEntryRow) -> Result<()>;
    async fn touch_cache_entry(&self, cache_key: &str, now: i64) -> Result<()>;
    async fn delete_cache_entry(&self, cache_key: &str) -> Result<()>;
    async fn list_cache_entries(&self) -> Result<Vec<CacheEntryRow>>;

    async fn insert_job(&self, row: &JobRow) -> Result<()>;
    async fn update_job(&self, row: &JobRow) -> Result<()>;
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRow>>;
    async fn latest_job_for_key(&self, cache_key: &str) -> Result<Option<JobRow>>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
            .map_err(crate::error::CoreError::Database)?
            .create_if_missing(true);
        // A single connection gives the serialized-SQL-access-path the
        // concurrency model requires without a separate mutex.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                file_id TEXT PRIMARY KEY,
                original_name TEXT NOT NULL,
                size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                file_type TEXT NOT NULL,
                stored_path TEXT NOT NULL,
                file_hash TEXT,
                created_at INTEGER NOT NULL,
                ttl_seconds INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_key TEXT PRIMARY KEY,
                source_type TEXT NOT NULL,
                source_ref TEXT NOT NULL,
                source_name TEXT,
                status TEXT NOT NULL,
                profile_version TEXT NOT NULL,
                summary_text TEXT,
                bundle_path TEXT NOT NULL,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                cache_key TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                error TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn upsert_upload(&self, row: &UploadRow) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO uploads
                (file_id, original_name, size, mime_type, file_type, stored_path, file_hash, created_at, ttl_seconds)
               VALUES (?,?,?,?,?,?,?,?,?)
               ON CONFLICT(file_id) DO UPDATE SET
                 original_name=excluded.original_name, size=excluded.size, mime_type=excluded.mime_type,
                 file_type=excluded.file_type, stored_path=excluded.stored_path, file_hash=excluded.file_hash,
                 created_at=excluded.created_at, ttl_seconds=excluded.ttl_seconds"#,
        )
        .bind(&row.file_id)
        .bind(&row.original_name)
        .bind(row.size)
        .bind(&row.mime_type)
        .bind(&row.file_type)
        .bind(&row.stored_path)
        .bind(&row.file_hash)
        .bind(row.created_at)
        .bind(row.ttl_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_upload(&self, file_id: &str) -> Result<Option<UploadRow>> {
        let row = sqlx::query("SELECT * FROM uploads WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| UploadRow {
            file_id: r.get("file_id"),
            original_name: r.get("original_name"),
            size: r.get("size"),
            mime_type: r.get("mime_type"),
            file_type: r.get("file_type"),
            stored_path: r.get("stored_path"),
            file_hash: r.get("file_hash"),
            created_at: r.get("created_at"),
            ttl_seconds: r.get("ttl_seconds"),
        }))
    }

    async fn delete_upload(&self, file_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM uploads WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_uploads(&self) -> Result<Vec<UploadRow>> {
        let rows = sqlx::query("SELECT * FROM uploads").fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| UploadRow {
                file_id: r.get("file_id"),
                original_name: r.get("original_name"),
                size: r.get("size"),
                mime_type: r.get("mime_type"),
                file_type: r.get("file_type"),
                stored_path: r.get("stored_path"),
                file_hash: r.get("file_hash"),
                created_at: r.get("created_at"),
                ttl_seconds: r.get("ttl_seconds"),
            })
            .collect())
    }

    async fn get_cache_entry(&self, cache_key: &str) -> Result<Option<CacheEntryRow>> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_cache_entry))
    }

    async fn insert_cache_entry(&self, row: &CacheEntryRow) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO cache_entries
                (cache_key, source_type, source_ref, source_name, status, profile_version,
                 summary_text, bundle_path, error, created_at, updated_at, last_accessed)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(&row.cache_key)
        .bind(&row.source_type)
        .bind(&row.source_ref)
        .bind(&row.source_name)
        .bind(&row.status)
        .bind(&row.profile_version)
        .bind(&row.summary_text)
        .bind(&row.bundle_path)
        .bind(&row.error)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.last_accessed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_cache_entry(&self, row: &CacheEntryRow) -> Result<()> {
        sqlx::query(
            r#"UPDATE cache_entries SET
                source_type=?, source_ref=?, source_name=?, status=?, profile_version=?,
                summary_text=?, bundle_path=?, error=?, updated_at=?, last_accessed=?
               WHERE cache_key=?"#,
        )
        .bind(&row.source_type)
        .bind(&row.source_ref)
        .bind(&row.source_name)
        .bind(&row.status)
        .bind(&row.profile_version)
        .bind(&row.summary_text)
        .bind(&row.bundle_path)
        .bind(&row.error)
        .bind(row.updated_at)
        .bind(row.last_accessed)
        .bind(&row.cache_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_cache_entry(&self, cache_key: &str, now: i64) -> Result<()> {
        sqlx::query("UPDATE cache_entries SET last_accessed = ? WHERE cache_key = ?")
            .bind(now)
            .bind(cache_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_cache_entry(&self, cache_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?")
            .bind(cache_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_cache_entries(&self) -> Result<Vec<CacheEntryRow>> {
        let rows = sqlx::query("SELECT * FROM cache_entries")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_cache_entry).collect())
    }

    async fn insert_job(&self, row: &JobRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (job_id, cache_key, status, created_at, updated_at, error) VALUES (?,?,?,?,?,?)",
        )
        .bind(&row.job_id)
        .bind(&row.cache_key)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(&row.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_job(&self, row: &JobRow) -> Result<()> {
        sqlx::query("UPDATE jobs SET status=?, updated_at=?, error=? WHERE job_id=?")
            .bind(&row.status)
            .bind(row.updated_at)
            .bind(&row.error)
            .bind(&row.job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRow>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_job))
    }

    async fn latest_job_for_key(&self, cache_key: &str) -> Result<Option<JobRow>> {
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE cache_key = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_job))
    }
}

fn row_to_cache_entry(r: sqlx::sqlite::SqliteRow) -> CacheEntryRow {
    CacheEntryRow {
        cache_key: r.get("cache_key"),
        source_type: r.get("source_type"),
        source_ref: r.get("source_ref"),
        source_name: r.get("source_name"),
        status: r.get("status"),
        profile_version: r.get("profile_version"),
        summary_text: r.get("summary_text"),
        bundle_path: r.get("bundle_path"),
        error: r.get("error"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        last_accessed: r.get("last_accessed"),
    }
}

fn row_to_job(r: sqlx::sqlite::SqliteRow) -> JobRow {
    JobRow {
        job_id: r.get("job_id"),
        cache_key: r.get("cache_key"),
        status: r.get("status"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        error: r.get("error"),
    }
}

pub fn source_type_str(st: SourceType) -> &'static str {
    match st {
        SourceType::Url => "url",
        SourceType::Local => "local",
    }
}

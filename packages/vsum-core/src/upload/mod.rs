//! Streamed, size-capped upload ingest with type validation, content
//! hashing and a TTL sweeper. No process-wide singleton: constructed
//! once in `main` and shared as an `Arc`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::store::{PersistenceStore, UploadRow};

fn video_extensions() -> HashSet<&'static str> {
    ["mp4", "mkv", "webm", "mov", "avi", "flv", "wmv"].into_iter().collect()
}
fn audio_extensions() -> HashSet<&'static str> {
    ["mp3", "wav", "flac", "aac", "m4a", "ogg", "wma"].into_iter().collect()
}
fn subtitle_extensions() -> HashSet<&'static str> {
    ["srt", "vtt", "ass", "ssa", "sub"].into_iter().collect()
}
fn video_mimes() -> HashSet<&'static str> {
    [
        "video/mp4", "video/x-matroska", "video/webm", "video/quicktime", "video/x-msvideo",
        "video/x-flv", "video/x-ms-wmv",
    ]
    .into_iter()
    .collect()
}
fn audio_mimes() -> HashSet<&'static str> {
    [
        "audio/mpeg", "audio/wav", "audio/x-wav", "audio/flac", "audio/aac", "audio/mp4",
        "audio/ogg", "audio/x-ms-wma",
    ]
    .into_iter()
    .collect()
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_id: String,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
    pub file_type: String,
    pub stored_path: PathBuf,
    pub file_hash: Option<String>,
    pub created_at: i64,
    pub ttl_seconds: i64,
}

impl UploadedFile {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.created_at + self.ttl_seconds
    }

    fn from_row(row: UploadRow) -> Self {
        Self {
            file_id: row.file_id,
            original_name: row.original_name,
            size: row.size as u64,
            mime_type: row.mime_type,
            file_type: row.file_type,
            stored_path: PathBuf::from(row.stored_path),
            file_hash: row.file_hash,
            created_at: row.created_at,
            ttl_seconds: row.ttl_seconds,
        }
    }

    fn to_row(&self) -> UploadRow {
        UploadRow {
            file_id: self.file_id.clone(),
            original_name: self.original_name.clone(),
            size: self.size as i64,
            mime_type: self.mime_type.clone(),
            file_type: self.file_type.clone(),
            stored_path: self.stored_path.to_string_lossy().into_owned(),
            file_hash: self.file_hash.clone(),
            created_at: self.created_at,
            ttl_seconds: self.ttl_seconds,
        }
    }
}

fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let cleaned: String = base
        .chars()
        .map(|c| {
            if "<>:\"/\\|?*".contains(c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let path = Path::new(&cleaned);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();
    let stem: String = stem.chars().take(200).collect();
    format!("{stem}{ext}")
}

fn detect_file_type(filename: &str, content_type: Option<&str>) -> Result<(&'static str, String)> {
    let ext = Path::new(filename)
        .extension()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let mime = content_type
        .filter(|m| !m.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();

    if video_extensions().contains(ext.as_str()) {
        if mime != "application/octet-stream" && !video_mimes().contains(mime.as_str()) {
            return Err(CoreError::UnsupportedType(format!(
                "video mime mismatch: {mime}"
            )));
        }
        return Ok(("video", mime));
    }
    if audio_extensions().contains(ext.as_str()) {
        if mime != "application/octet-stream" && !audio_mimes().contains(mime.as_str()) {
            return Err(CoreError::UnsupportedType(format!(
                "audio mime mismatch: {mime}"
            )));
        }
        return Ok(("audio", mime));
    }
    if subtitle_extensions().contains(ext.as_str()) {
        // Subtitle MIME checking is intentionally permissive.
        return Ok(("subtitle", mime));
    }
    Err(CoreError::UnsupportedType(format!(
        "unsupported file extension: .{ext}"
    )))
}

pub struct UploadStorage<S: PersistenceStore> {
    store: Arc<S>,
    upload_root: PathBuf,
    max_size_bytes: u64,
    default_ttl_seconds: i64,
    chunk_size: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    ingest_semaphore: Arc<Semaphore>,
    cache: Mutex<std::collections::HashMap<String, UploadedFile>>,
}

impl<S: PersistenceStore> UploadStorage<S> {
    pub fn new(
        store: Arc<S>,
        upload_root: PathBuf,
        max_size_bytes: u64,
        default_ttl_seconds: i64,
        chunk_size: usize,
        read_timeout: Duration,
        write_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            upload_root,
            max_size_bytes,
            default_ttl_seconds,
            chunk_size,
            read_timeout,
            write_timeout,
            ingest_semaphore: Arc::new(Semaphore::new(concurrency)),
            cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Loads existing rows from the store, purging rows whose TTL has
    /// already elapsed or whose physical file is missing.
    pub async fn recover(&self) -> Result<()> {
        let now = Utc::now().timestamp();
        for row in self.store.list_uploads().await? {
            let file = UploadedFile::from_row(row);
            if file.is_expired(now) {
                let _ = tokio::fs::remove_file(&file.stored_path).await;
                if let Some(parent) = file.stored_path.parent() {
                    let _ = tokio::fs::remove_dir(parent).await;
                }
                self.store.delete_upload(&file.file_id).await?;
                continue;
            }
            if !file.stored_path.exists() {
                self.store.delete_upload(&file.file_id).await?;
                continue;
            }
            self.cache.lock().insert(file.file_id.clone(), file);
        }
        Ok(())
    }

    /// Streams `read_chunk` until it yields an empty buffer, enforcing
    /// size and I/O timeouts, and persists the result.
    pub async fn save_stream<F, Fut>(
        &self,
        mut read_chunk: F,
        original_name: &str,
        content_type: Option<&str>,
    ) -> Result<UploadedFile>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = std::io::Result<Vec<u8>>>,
    {
        let _permit = self
            .ingest_semaphore
            .acquire()
            .await
            .map_err(|e| CoreError::Other(anyhow::anyhow!(e)))?;

        let (file_type, mime_type) = detect_file_type(original_name, content_type)?;
        let safe_name = sanitize_filename(original_name);
        let file_id = format!("f_{}", Uuid::new_v4().simple());
        let dir = self.upload_root.join(&file_id);
        tokio::fs::create_dir_all(&dir).await?;
        let stored_path = dir.join(&safe_name);

        let result = self.write_stream(&mut read_chunk, &stored_path).await;
        let (size, hash) = match result {
            Ok(v) => v,
            Err(e) => {
                let _ = tokio::fs::remove_file(&stored_path).await;
                let _ = tokio::fs::remove_dir(&dir).await;
                return Err(e);
            }
        };

        let now = Utc::now().timestamp();
        let uploaded = UploadedFile {
            file_id,
            original_name: original_name.to_string(),
            size,
            mime_type,
            file_type: file_type.to_string(),
            stored_path,
            file_hash: Some(hash),
            created_at: now,
            ttl_seconds: self.default_ttl_seconds,
        };

        self.store.upsert_upload(&uploaded.to_row()).await?;
        self.cache.lock().insert(uploaded.file_id.clone(), uploaded.clone());
        Ok(uploaded)
    }

    async fn write_stream<F, Fut>(&self, read_chunk: &mut F, stored_path: &Path) -> Result<(u64, String)>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = std::io::Result<Vec<u8>>>,
    {
        let mut file = tokio::fs::File::create(stored_path).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        loop {
            let chunk = tokio::time::timeout(self.read_timeout, read_chunk(self.chunk_size))
                .await
                .map_err(|_| CoreError::TimedOut("upload read timed out".to_string()))??;
            if chunk.is_empty() {
                break;
            }
            size += chunk.len() as u64;
            if size > self.max_size_bytes {
                return Err(CoreError::TooLarge(format!(
                    "upload exceeds {} bytes",
                    self.max_size_bytes
                )));
            }
            hasher.update(&chunk);
            tokio::time::timeout(self.write_timeout, file.write_all(&chunk))
                .await
                .map_err(|_| CoreError::TimedOut("upload write timed out".to_string()))??;
        }

        if size == 0 {
            return Err(CoreError::InvalidInput("empty upload body".to_string()));
        }
        file.flush().await?;
        Ok((size, hex::encode(hasher.finalize())))
    }

    pub async fn get(&self, file_id: &str) -> Result<UploadedFile> {
        if let Some(f) = self.cache.lock().get(file_id).cloned() {
            return self.check_live(f).await;
        }
        let row = self
            .store
            .get_upload(file_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("upload {file_id}")))?;
        let file = UploadedFile::from_row(row);
        self.cache.lock().insert(file.file_id.clone(), file.clone());
        self.check_live(file).await
    }

    async fn check_live(&self, file: UploadedFile) -> Result<UploadedFile> {
        let now = Utc::now().timestamp();
        if file.is_expired(now) {
            self.delete(&file.file_id).await?;
            return Err(CoreError::NotFound(format!("upload {} expired", file.file_id)));
        }
        if !file.stored_path.exists() {
            self.cache.lock().remove(&file.file_id);
            self.store.delete_upload(&file.file_id).await?;
            return Err(CoreError::NotFound(format!(
                "upload {} missing on disk",
                file.file_id
            )));
        }
        Ok(file)
    }

    /// Resolves `file_id`s to validated on-disk paths, checked against
    /// each upload's recorded `file_type`.
    pub async fn resolve_file_ids(
        &self,
        video_file_id: Option<&str>,
        audio_file_id: Option<&str>,
        subtitle_file_id: Option<&str>,
    ) -> Result<(Option<PathBuf>, Option<PathBuf>, Option<PathBuf>)> {
        let video_path = match video_file_id {
            Some(id) => Some(self.resolve_typed(id, "video").await?),
            None => None,
        };
        let audio_path = match audio_file_id {
            Some(id) => Some(self.resolve_typed(id, "audio").await?),
            None => None,
        };
        let subtitle_path = match subtitle_file_id {
            Some(id) => Some(self.resolve_typed(id, "subtitle").await?),
            None => None,
        };
        Ok((video_path, audio_path, subtitle_path))
    }

    async fn resolve_typed(&self, file_id: &str, expected_type: &str) -> Result<PathBuf> {
        let file = self.get(file_id).await?;
        if file.file_type != expected_type {
            return Err(CoreError::UnsupportedType(format!(
                "file_id {file_id} is not a {expected_type} file"
            )));
        }
        Ok(file.stored_path)
    }

    pub async fn delete(&self, file_id: &str) -> Result<()> {
        if let Some(file) = self.cache.lock().remove(file_id) {
            let _ = tokio::fs::remove_file(&file.stored_path).await;
            if let Some(parent) = file.stored_path.parent() {
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        self.store.delete_upload(file_id).await
    }

    /// One sweep of the TTL cleanup loop. Intended to be called from a
    /// background interval timer (default hourly).
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let expired: Vec<String> = self
            .cache
            .lock()
            .values()
            .filter(|f| f.is_expired(now))
            .map(|f| f.file_id.clone())
            .collect();
        for id in &expired {
            self.delete(id).await?;
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn storage() -> (tempfile::TempDir, UploadStorage<SqliteStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::connect(&dir.path().join("s.db")).await.unwrap());
        let storage = UploadStorage::new(
            store,
            dir.path().join("uploads"),
            1024,
            3600,
            64,
            Duration::from_secs(5),
            Duration::from_secs(5),
            2,
        );
        (dir, storage)
    }

    async fn reader(bytes: Vec<u8>) -> impl FnMut(usize) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<Vec<u8>>> + Send>> {
        let remaining = std::sync::Arc::new(Mutex::new(bytes));
        move |n: usize| {
            let remaining = remaining.clone();
            Box::pin(async move {
                let mut guard = remaining.lock();
                if guard.is_empty() {
                    return Ok(Vec::new());
                }
                let take = n.min(guard.len());
                Ok(guard.drain(0..take).collect())
            })
        }
    }

    #[tokio::test]
    async fn accepts_exact_size_cap() {
        let (_guard, storage) = storage().await;
        let bytes = vec![0u8; 1024];
        let uploaded = storage
            .save_stream(reader(bytes).await, "clip.mp4", Some("video/mp4"))
            .await
            .unwrap();
        assert_eq!(uploaded.size, 1024);
    }

    #[tokio::test]
    async fn rejects_one_byte_over_cap_with_no_residue() {
        let (_guard, storage) = storage().await;
        let bytes = vec![0u8; 1025];
        let err = storage
            .save_stream(reader(bytes).await, "clip.mp4", Some("video/mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TooLarge(_)));
        let mut entries = tokio::fs::read_dir(storage.upload_root.clone()).await.unwrap();
        // The per-upload directory should have been cleaned up.
        while let Some(e) = entries.next_entry().await.unwrap() {
            let mut inner = tokio::fs::read_dir(e.path()).await.unwrap();
            assert!(inner.next_entry().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn rejects_empty_body() {
        let (_guard, storage) = storage().await;
        let err = storage
            .save_stream(reader(vec![]).await, "clip.mp4", Some("video/mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rejects_unsupported_extension() {
        let (_guard, storage) = storage().await;
        let err = storage
            .save_stream(reader(vec![1, 2, 3]).await, "file.exe", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn same_bytes_different_filenames_yield_two_records_same_hash() {
        let (_guard, storage) = storage().await;
        let a = storage
            .save_stream(reader(b"hello world".to_vec()).await, "a.mp3", Some("audio/mpeg"))
            .await
            .unwrap();
        let b = storage
            .save_stream(reader(b"hello world".to_vec()).await, "b.mp3", Some("audio/mpeg"))
            .await
            .unwrap();
        assert_ne!(a.file_id, b.file_id);
        assert_eq!(a.file_hash, b.file_hash);
    }

    #[test]
    fn sanitize_strips_path_and_unsafe_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a<b>c.mp4"), "a_b_c.mp4");
    }

    #[test]
    fn sanitize_caps_stem_length() {
        let long = "a".repeat(500) + ".mp4";
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.len() <= 204);
        assert!(sanitized.ends_with(".mp4"));
    }
}

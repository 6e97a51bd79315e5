use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::cache::bundle::{BundleManager, BundleStatus};
use crate::cache::key::{self, MediaIdentityExtractor, SourceType};
use crate::cache::is_sentinel_summary;
use crate::error::{CoreError, Result};
use crate::store::{CacheEntryRow, CacheStatus, JobRow, PersistenceStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStatus {
    NotFound,
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct LookupResult {
    pub hit: bool,
    pub status: LookupStatus,
    pub cache_key: String,
    pub summary_text: Option<String>,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub cache_key: String,
    pub source_type: String,
    pub source_ref: String,
    pub source_name: Option<String>,
    pub status: CacheStatus,
    pub profile_version: String,
    pub summary_text: Option<String>,
    pub bundle_path: String,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed: i64,
}

impl From<CacheEntryRow> for CacheEntry {
    fn from(r: CacheEntryRow) -> Self {
        Self {
            cache_key: r.cache_key,
            source_type: r.source_type,
            source_ref: r.source_ref,
            source_name: r.source_name,
            status: CacheStatus::parse(&r.status),
            profile_version: r.profile_version,
            summary_text: r.summary_text,
            bundle_path: r.bundle_path,
            error: r.error,
            created_at: r.created_at,
            updated_at: r.updated_at,
            last_accessed: r.last_accessed,
        }
    }
}

/// Schema `summary.json` must satisfy at publication time and at strict
/// lookup time.
#[derive(Debug, Deserialize)]
pub struct SummaryJson {
    pub summary_text: String,
    pub model: String,
    pub input_chars: i64,
    pub profile_version: String,
}

/// Lookup / create-or-get / state transitions, cross-checking the store,
/// the manifest and the summary artifact. Constructed once at startup
/// and shared as an `Arc`; no package-level singleton.
pub struct CacheService<S: PersistenceStore> {
    store: Arc<S>,
    bundles: Arc<BundleManager>,
    profile_version: String,
    /// Per-cache-key submission lock, closing the lookup -> create race
    /// named as an Open Question upstream.
    key_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl<S: PersistenceStore> CacheService<S> {
    pub fn new(store: Arc<S>, bundles: Arc<BundleManager>, profile_version: String) -> Self {
        Self {
            store,
            bundles,
            profile_version,
            key_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, cache_key: &str) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .entry(cache_key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Runs `get_or_create_entry` + `create_job` as one critical section
    /// per cache key, per the decided Open Question.
    pub async fn submit(
        &self,
        source_type: SourceType,
        source_ref: &str,
        cache_key: &str,
        source_name: Option<&str>,
    ) -> Result<(CacheEntry, String)> {
        let lock = self.lock_for(cache_key);
        let _guard = lock.lock().await;
        let entry = self
            .get_or_create_entry(cache_key, source_type, source_ref, source_name)
            .await?;
        let job_id = self.create_job(cache_key).await?;
        Ok((entry, job_id))
    }

    pub async fn lookup(
        &self,
        source_type: SourceType,
        source_url: Option<&str>,
        file_hash: Option<&str>,
        strict: bool,
        touch: bool,
        extractor: &dyn MediaIdentityExtractor,
    ) -> Result<LookupResult> {
        let (source_ref, cache_key) =
            key::compute_cache_key_from_source(source_type, source_url, file_hash, extractor)?;

        let row = self.store.get_cache_entry(&cache_key).await?;
        let Some(row) = row else {
            return Ok(LookupResult {
                hit: false,
                status: LookupStatus::NotFound,
                cache_key,
                summary_text: None,
                job_id: None,
                error: None,
            });
        };
        let _ = &source_ref;

        if touch {
            self.store
                .touch_cache_entry(&cache_key, Utc::now().timestamp())
                .await?;
        }

        let entry: CacheEntry = row.into();
        match entry.status {
            CacheStatus::Completed => {
                if strict {
                    match self.validate_completed(&entry).await {
                        Ok(()) => Ok(LookupResult {
                            hit: true,
                            status: LookupStatus::Completed,
                            cache_key,
                            summary_text: entry.summary_text,
                            job_id: None,
                            error: None,
                        }),
                        Err(reason) => {
                            self.update_status(
                                &cache_key,
                                CacheStatus::Failed,
                                None,
                                Some(&reason.to_string()),
                                None,
                            )
                            .await?;
                            Ok(LookupResult {
                                hit: false,
                                status: LookupStatus::Failed,
                                cache_key,
                                summary_text: None,
                                job_id: None,
                                error: Some(reason.to_string()),
                            })
                        }
                    }
                } else {
                    Ok(LookupResult {
                        hit: true,
                        status: LookupStatus::Completed,
                        cache_key,
                        summary_text: entry.summary_text,
                        job_id: None,
                        error: None,
                    })
                }
            }
            CacheStatus::Pending | CacheStatus::Running => {
                let job = self.store.latest_job_for_key(&cache_key).await?;
                Ok(LookupResult {
                    hit: false,
                    status: if entry.status == CacheStatus::Running {
                        LookupStatus::Running
                    } else {
                        LookupStatus::Pending
                    },
                    cache_key,
                    summary_text: None,
                    job_id: job.map(|j| j.job_id),
                    error: None,
                })
            }
            CacheStatus::Failed => Ok(LookupResult {
                hit: false,
                status: LookupStatus::Failed,
                cache_key,
                summary_text: None,
                job_id: None,
                error: entry.error,
            }),
        }
    }

    async fn validate_completed(&self, entry: &CacheEntry) -> Result<()> {
        let summary_text = entry
            .summary_text
            .as_deref()
            .ok_or_else(|| CoreError::CacheInvalid("missing summary_text".to_string()))?;
        if is_sentinel_summary(summary_text) {
            return Err(CoreError::CacheInvalid(
                "summary_text empty or sentinel".to_string(),
            ));
        }

        let bundle_dir = std::path::PathBuf::from(&entry.bundle_path);
        let manifest = self
            .bundles
            .read_manifest(&bundle_dir)
            .await
            .map_err(|_| CoreError::CacheInvalid("manifest missing or unreadable".to_string()))?;

        if manifest.profile_version != self.profile_version {
            return Err(CoreError::ProfileVersionMismatch {
                expected: self.profile_version.clone(),
                found: manifest.profile_version.clone(),
            });
        }
        if manifest.status != BundleStatus::Completed {
            return Err(CoreError::CacheInvalid(
                "manifest status is not completed".to_string(),
            ));
        }

        let summary_path = bundle_dir.join("summary.json");
        let bytes = tokio::fs::read(&summary_path)
            .await
            .map_err(|e| CoreError::SummaryJsonInvalid(e.to_string()))?;
        let summary_json: SummaryJson =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::SummaryJsonInvalid(e.to_string()))?;

        if summary_json.profile_version != self.profile_version {
            return Err(CoreError::ProfileVersionMismatch {
                expected: self.profile_version.clone(),
                found: summary_json.profile_version,
            });
        }
        if summary_json.summary_text.trim() != summary_text.trim() {
            return Err(CoreError::SummaryTextMismatch);
        }

        Ok(())
    }

    pub async fn get_or_create_entry(
        &self,
        cache_key: &str,
        source_type: SourceType,
        source_ref: &str,
        source_name: Option<&str>,
    ) -> Result<CacheEntry> {
        let now = Utc::now().timestamp();
        if let Some(row) = self.store.get_cache_entry(cache_key).await? {
            let mut entry: CacheEntry = row.into();
            if entry.profile_version != self.profile_version {
                entry.status = CacheStatus::Pending;
                entry.summary_text = None;
                entry.error = None;
                entry.profile_version = self.profile_version.clone();
                entry.updated_at = now;
                self.store.update_cache_entry(&to_row(&entry)).await?;
                return Ok(entry);
            }
            if entry.source_name.is_none() {
                if let Some(name) = source_name {
                    entry.source_name = Some(name.to_string());
                    self.store.update_cache_entry(&to_row(&entry)).await?;
                }
            }
            return Ok(entry);
        }

        let st = crate::store::source_type_str(source_type);
        let bundle_path = self
            .bundles
            .bundle_dir(st, cache_key)
            .to_string_lossy()
            .into_owned();
        let entry = CacheEntry {
            cache_key: cache_key.to_string(),
            source_type: st.to_string(),
            source_ref: source_ref.to_string(),
            source_name: source_name.map(|s| s.to_string()),
            status: CacheStatus::Pending,
            profile_version: self.profile_version.clone(),
            summary_text: None,
            bundle_path,
            error: None,
            created_at: now,
            updated_at: now,
            last_accessed: now,
        };
        self.store.insert_cache_entry(&to_row(&entry)).await?;
        Ok(entry)
    }

    pub async fn update_status(
        &self,
        cache_key: &str,
        status: CacheStatus,
        summary_text: Option<&str>,
        error: Option<&str>,
        source_name: Option<&str>,
    ) -> Result<()> {
        let Some(row) = self.store.get_cache_entry(cache_key).await? else {
            return Err(CoreError::NotFound(format!("cache entry {cache_key}")));
        };
        let mut entry: CacheEntry = row.into();
        entry.status = status;
        entry.updated_at = Utc::now().timestamp();
        if let Some(s) = summary_text {
            entry.summary_text = Some(s.to_string());
        }
        if let Some(e) = error {
            entry.error = Some(e.to_string());
        }
        if let Some(n) = source_name {
            entry.source_name = Some(n.to_string());
        }
        self.store.update_cache_entry(&to_row(&entry)).await?;

        let bundle_dir = std::path::PathBuf::from(&entry.bundle_path);
        if let Ok(mut manifest) = self.bundles.read_manifest(&bundle_dir).await {
            manifest.status = match status {
                CacheStatus::Pending => BundleStatus::Pending,
                CacheStatus::Running => BundleStatus::Running,
                CacheStatus::Completed => BundleStatus::Completed,
                CacheStatus::Failed => BundleStatus::Failed,
            };
            if let Some(s) = summary_text {
                manifest.summary_text = Some(s.to_string());
            }
            if let Some(e) = error {
                manifest.error = Some(e.to_string());
            }
            let _ = self
                .bundles
                .write_manifest(cache_key, &entry.source_type, &mut manifest, Some(&bundle_dir), Utc::now().timestamp())
                .await;
        }
        Ok(())
    }

    pub async fn create_job(&self, cache_key: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let job_id = format!("job_{}", Uuid::new_v4().simple());
        self.store
            .insert_job(&JobRow {
                job_id: job_id.clone(),
                cache_key: cache_key.to_string(),
                status: "pending".to_string(),
                created_at: now,
                updated_at: now,
                error: None,
            })
            .await?;
        Ok(job_id)
    }

    pub async fn update_job(&self, job_id: &str, status: &str, error: Option<&str>) -> Result<()> {
        let Some(mut row) = self.store.get_job(job_id).await? else {
            return Err(CoreError::NotFound(format!("job {job_id}")));
        };
        row.status = status.to_string();
        row.updated_at = Utc::now().timestamp();
        if let Some(e) = error {
            row.error = Some(e.to_string());
        }
        self.store.update_job(&row).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<(JobRow, Option<CacheEntry>)>> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(None);
        };
        let entry = self
            .store
            .get_cache_entry(&job.cache_key)
            .await?
            .map(CacheEntry::from);
        Ok(Some((job, entry)))
    }

    pub async fn delete(&self, cache_key: &str) -> Result<()> {
        if let Some(row) = self.store.get_cache_entry(cache_key).await? {
            self.bundles.delete_bundle(&row.source_type, cache_key).await?;
        }
        self.store.delete_cache_entry(cache_key).await
    }
}

fn to_row(entry: &CacheEntry) -> CacheEntryRow {
    CacheEntryRow {
        cache_key: entry.cache_key.clone(),
        source_type: entry.source_type.clone(),
        source_ref: entry.source_ref.clone(),
        source_name: entry.source_name.clone(),
        status: entry.status.as_str().to_string(),
        profile_version: entry.profile_version.clone(),
        summary_text: entry.summary_text.clone(),
        bundle_path: entry.bundle_path.clone(),
        error: entry.error.clone(),
        created_at: entry.created_at,
        updated_at: entry.updated_at,
        last_accessed: entry.last_accessed,
    }
}

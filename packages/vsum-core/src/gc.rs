//! Background reclamation: three sweeps run in sequence each cycle,
//! mirroring the cache lifecycle states (`cache/service.rs`) and the
//! bundle-directory ownership model (`cache/bundle.rs`). Never touches
//! `running`/`pending` entries or tmp directories, those are owned by
//! the worker between `create_tmp_dir` and `finalize_from_tmp`.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::cache::bundle::BundleManager;
use crate::config::Config;
use crate::error::Result;
use crate::store::{CacheEntryRow, CacheStatus, PersistenceStore};

#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub failed_fast_deleted: u64,
    pub ttl_deleted: u64,
    pub size_budget_deleted: u64,
    pub bytes_freed: u64,
}

impl GcReport {
    fn merge(&mut self, other: GcReport) {
        self.failed_fast_deleted += other.failed_fast_deleted;
        self.ttl_deleted += other.ttl_deleted;
        self.size_budget_deleted += other.size_budget_deleted;
        self.bytes_freed += other.bytes_freed;
    }
}

pub struct GarbageCollector<S: PersistenceStore> {
    store: Arc<S>,
    bundles: Arc<BundleManager>,
    failed_ttl_seconds: i64,
    cache_ttl_seconds: i64,
    cache_max_bytes: u64,
}

impl<S: PersistenceStore> GarbageCollector<S> {
    pub fn new(store: Arc<S>, bundles: Arc<BundleManager>, config: &Config) -> Self {
        Self {
            store,
            bundles,
            failed_ttl_seconds: config.failed_ttl_hours * 3600,
            cache_ttl_seconds: config.cache_ttl_days * 86_400,
            cache_max_bytes: config.cache_max_bytes,
        }
    }

    /// Runs all three sweeps once. Each sweep re-lists entries from the
    /// store so a deletion in an earlier sweep is reflected in the next.
    pub async fn run_cycle(&self) -> Result<GcReport> {
        let mut report = GcReport::default();
        report.merge(self.sweep_failed_fast().await?);
        report.merge(self.sweep_ttl().await?);
        report.merge(self.sweep_size_budget().await?);
        info!(
            failed_fast = report.failed_fast_deleted,
            ttl = report.ttl_deleted,
            size_budget = report.size_budget_deleted,
            bytes_freed = report.bytes_freed,
            "gc cycle complete"
        );
        Ok(report)
    }

    async fn sweep_failed_fast(&self) -> Result<GcReport> {
        let now = Utc::now().timestamp();
        let mut report = GcReport::default();
        for entry in self.store.list_cache_entries().await? {
            if entry.status != "failed" {
                continue;
            }
            if now - entry.updated_at <= self.failed_ttl_seconds {
                continue;
            }
            let freed = self.delete_entry(&entry).await?;
            report.failed_fast_deleted += 1;
            report.bytes_freed += freed;
        }
        Ok(report)
    }

    async fn sweep_ttl(&self) -> Result<GcReport> {
        let now = Utc::now().timestamp();
        let mut report = GcReport::default();
        for entry in self.store.list_cache_entries().await? {
            if is_active(&entry) {
                continue;
            }
            if now - entry.updated_at <= self.cache_ttl_seconds {
                continue;
            }
            let freed = self.delete_entry(&entry).await?;
            report.ttl_deleted += 1;
            report.bytes_freed += freed;
        }
        Ok(report)
    }

    async fn sweep_size_budget(&self) -> Result<GcReport> {
        let mut report = GcReport::default();
        let mut total = self.total_bundle_bytes().await?;
        if total <= self.cache_max_bytes {
            return Ok(report);
        }

        let mut entries: Vec<CacheEntryRow> = self
            .store
            .list_cache_entries()
            .await?
            .into_iter()
            .filter(|e| !is_active(e))
            .collect();
        entries.sort_by_key(|e| e.last_accessed.max(e.updated_at));

        for entry in entries {
            if total <= self.cache_max_bytes {
                break;
            }
            let freed = self.delete_entry(&entry).await?;
            total = total.saturating_sub(freed);
            report.size_budget_deleted += 1;
            report.bytes_freed += freed;
        }
        Ok(report)
    }

    async fn total_bundle_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        for entry in self.store.list_cache_entries().await? {
            total += self
                .bundles
                .get_bundle_size(&entry.source_type, &entry.cache_key)
                .await
                .unwrap_or(0);
        }
        Ok(total)
    }

    async fn delete_entry(&self, entry: &CacheEntryRow) -> Result<u64> {
        let freed = self
            .bundles
            .get_bundle_size(&entry.source_type, &entry.cache_key)
            .await
            .unwrap_or(0);
        self.bundles
            .delete_bundle(&entry.source_type, &entry.cache_key)
            .await?;
        self.store.delete_cache_entry(&entry.cache_key).await?;
        Ok(freed)
    }
}

fn is_active(entry: &CacheEntryRow) -> bool {
    matches!(
        CacheStatus::parse(&entry.status),
        CacheStatus::Running | CacheStatus::Pending
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::path::PathBuf;

    async fn harness() -> (tempfile::TempDir, Arc<SqliteStore>, Arc<BundleManager>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::connect(&dir.path().join("s.db")).await.unwrap());
        let bundles = Arc::new(BundleManager::new(dir.path().join("cache"), dir.path().join("tmp")));
        (dir, store, bundles)
    }

    fn row(cache_key: &str, status: &str, updated_at: i64, last_accessed: i64) -> CacheEntryRow {
        CacheEntryRow {
            cache_key: cache_key.to_string(),
            source_type: "url".to_string(),
            source_ref: "https://x".to_string(),
            source_name: None,
            status: status.to_string(),
            profile_version: "v1".to_string(),
            summary_text: Some("a summary".to_string()),
            bundle_path: PathBuf::new().to_string_lossy().into_owned(),
            error: None,
            created_at: 0,
            updated_at,
            last_accessed,
        }
    }

    fn gc_config() -> Config {
        let mut c = Config::default();
        c.failed_ttl_hours = 24;
        c.cache_ttl_days = 30;
        c.cache_max_bytes = 50 * 1024 * 1024 * 1024;
        c
    }

    #[tokio::test]
    async fn failed_fast_sweep_deletes_stale_failures() {
        let (_guard, store, bundles) = harness().await;
        let now = Utc::now().timestamp();
        store
            .insert_cache_entry(&row("k1", "failed", now - 25 * 3600, now - 25 * 3600))
            .await
            .unwrap();
        store
            .insert_cache_entry(&row("k2", "failed", now - 1800, now - 1800))
            .await
            .unwrap();

        let gc = GarbageCollector::new(store.clone(), bundles, &gc_config());
        let report = gc.run_cycle().await.unwrap();
        assert_eq!(report.failed_fast_deleted, 1);
        assert!(store.get_cache_entry("k1").await.unwrap().is_none());
        assert!(store.get_cache_entry("k2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn running_and_pending_entries_are_never_swept() {
        let (_guard, store, bundles) = harness().await;
        let now = Utc::now().timestamp();
        store
            .insert_cache_entry(&row("k1", "running", now - 400 * 86_400, now - 400 * 86_400))
            .await
            .unwrap();
        store
            .insert_cache_entry(&row("k2", "pending", now - 400 * 86_400, now - 400 * 86_400))
            .await
            .unwrap();

        let gc = GarbageCollector::new(store.clone(), bundles, &gc_config());
        gc.run_cycle().await.unwrap();
        assert!(store.get_cache_entry("k1").await.unwrap().is_some());
        assert!(store.get_cache_entry("k2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ttl_sweep_deletes_stale_completed_entries() {
        let (_guard, store, bundles) = harness().await;
        let now = Utc::now().timestamp();
        store
            .insert_cache_entry(&row("k1", "completed", now - 40 * 86_400, now - 40 * 86_400))
            .await
            .unwrap();

        let gc = GarbageCollector::new(store.clone(), bundles, &gc_config());
        let report = gc.run_cycle().await.unwrap();
        assert_eq!(report.ttl_deleted, 1);
        assert!(store.get_cache_entry("k1").await.unwrap().is_none());
    }
}

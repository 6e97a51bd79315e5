use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

pub const BUNDLE_VERSION: &str = "v2";

/// `kind -> {path, size, sha256}` entry in the manifest's `artifacts` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub path: String,
    pub size: u64,
    pub sha256: Option<String>,
}

/// Canonical on-disk filename for each artifact kind.
pub fn canonical_artifact_name(kind: &str) -> Result<&'static str> {
    match kind {
        "video" => Ok("video.mp4"),
        "audio" => Ok("audio.wav"),
        "subtitle" => Ok("subtitle.vtt"),
        "asr" => Ok("asr.json"),
        "summary" => Ok("summary.json"),
        other => Err(CoreError::InvalidInput(format!(
            "unknown artifact kind: {other}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub version: String,
    pub profile_version: String,
    pub cache_key: String,
    pub source_type: String,
    pub source_ref: String,
    pub source_name: Option<String>,
    pub status: BundleStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub artifacts: BTreeMap<String, ArtifactInfo>,
    pub summary_text: Option<String>,
    pub error: Option<String>,
}

impl BundleManifest {
    pub fn new(
        cache_key: &str,
        source_type: &str,
        source_ref: &str,
        profile_version: &str,
        now: i64,
    ) -> Self {
        Self {
            version: BUNDLE_VERSION.to_string(),
            profile_version: profile_version.to_string(),
            cache_key: cache_key.to_string(),
            source_type: source_type.to_string(),
            source_ref: source_ref.to_string(),
            source_name: None,
            status: BundleStatus::Pending,
            created_at: now,
            updated_at: now,
            artifacts: BTreeMap::new(),
            summary_text: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMeta {
    pub source_type: String,
    pub source_ref: String,
    pub source_name: Option<String>,
}

/// Owns the bundle filesystem layout and the tmp-then-rename publication
/// protocol. `finalize_from_tmp` is the only admissible way to publish a
/// completed bundle: on the same filesystem, directory rename is atomic,
/// so a reader never observes a partially written final bundle.
pub struct BundleManager {
    cache_root: PathBuf,
    tmp_root: PathBuf,
}

impl BundleManager {
    pub fn new(cache_root: PathBuf, tmp_root: PathBuf) -> Self {
        Self {
            cache_root,
            tmp_root,
        }
    }

    pub fn bundle_dir(&self, source_type: &str, cache_key: &str) -> PathBuf {
        self.cache_root.join(source_type).join(cache_key)
    }

    pub fn tmp_dir(&self, job_id: &str) -> PathBuf {
        self.tmp_root.join(job_id)
    }

    pub async fn create_tmp_dir(&self, job_id: &str) -> Result<PathBuf> {
        let dir = self.tmp_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Write `bundle.json` atomically: write to a sibling temp file,
    /// `fsync`, then rename over the target. `target_dir` defaults to
    /// the final bundle directory.
    pub async fn write_manifest(
        &self,
        cache_key: &str,
        source_type: &str,
        manifest: &mut BundleManifest,
        target_dir: Option<&Path>,
        now: i64,
    ) -> Result<()> {
        manifest.updated_at = now;
        let dir = target_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.bundle_dir(source_type, cache_key));
        tokio::fs::create_dir_all(&dir).await?;

        let final_path = dir.join("bundle.json");
        let tmp_path = dir.join("bundle.json.tmp");
        let body = serde_json::to_vec_pretty(manifest).map_err(CoreError::serialization)?;

        let body_clone = body;
        let tmp_path_clone = tmp_path.clone();
        let final_path_clone = final_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            let mut f = std::fs::File::create(&tmp_path_clone)?;
            f.write_all(&body_clone)?;
            f.sync_all()?;
            std::fs::rename(&tmp_path_clone, &final_path_clone)?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::serialization(e))??;

        Ok(())
    }

    pub async fn write_source_meta(&self, dir: &Path, meta: &SourceMeta) -> Result<()> {
        let body = serde_json::to_vec_pretty(meta).map_err(CoreError::serialization)?;
        tokio::fs::write(dir.join("source.json"), body).await?;
        Ok(())
    }

    pub async fn read_manifest(&self, dir: &Path) -> Result<BundleManifest> {
        let bytes = tokio::fs::read(dir.join("bundle.json")).await?;
        serde_json::from_slice(&bytes).map_err(|e| CoreError::SummaryJsonInvalid(e.to_string()))
    }

    /// Copy `source_path` into `dir` under the canonical name for `kind`,
    /// measure its size, optionally hash it, and record the artifact in
    /// the manifest.
    pub async fn add_artifact(
        &self,
        dir: &Path,
        manifest: &mut BundleManifest,
        kind: &str,
        source_path: &Path,
        compute_hash: bool,
    ) -> Result<()> {
        let name = canonical_artifact_name(kind)?;
        let dest = dir.join(name);
        tokio::fs::copy(source_path, &dest).await?;
        let bytes = tokio::fs::read(&dest).await?;
        let size = bytes.len() as u64;
        let sha256 = if compute_hash {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            Some(hex::encode(hasher.finalize()))
        } else {
            None
        };
        manifest.artifacts.insert(
            kind.to_string(),
            ArtifactInfo {
                path: name.to_string(),
                size,
                sha256,
            },
        );
        Ok(())
    }

    /// Atomically promote the tmp directory for `job_id` to the final
    /// bundle path for `cache_key`. If a prior bundle exists at the final
    /// path it is removed first; the rename itself is the one atomic
    /// filesystem operation that actually publishes the bundle.
    pub async fn finalize_from_tmp(
        &self,
        job_id: &str,
        cache_key: &str,
        source_type: &str,
    ) -> Result<()> {
        let tmp = self.tmp_dir(job_id);
        let final_dir = self.bundle_dir(source_type, cache_key);
        if let Some(parent) = final_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_clone = tmp.clone();
        let final_clone = final_dir.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if final_clone.exists() {
                std::fs::remove_dir_all(&final_clone)?;
            }
            std::fs::rename(&tmp_clone, &final_clone)?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::BundleFinalizeFailed(e.to_string()))?
        .map_err(|e| CoreError::BundleFinalizeFailed(e.to_string()))?;

        Ok(())
    }

    pub async fn delete_bundle(&self, source_type: &str, cache_key: &str) -> Result<()> {
        let dir = self.bundle_dir(source_type, cache_key);
        if dir.exists() {
            tokio::fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }

    pub async fn get_bundle_size(&self, source_type: &str, cache_key: &str) -> Result<u64> {
        let dir = self.bundle_dir(source_type, cache_key);
        dir_size(&dir).await
    }

    pub async fn list_bundles(&self, source_type: Option<&str>) -> Result<Vec<BundleManifest>> {
        let mut out = Vec::new();
        let roots: Vec<PathBuf> = match source_type {
            Some(st) => vec![self.cache_root.join(st)],
            None => {
                let mut v = Vec::new();
                let mut rd = match tokio::fs::read_dir(&self.cache_root).await {
                    Ok(rd) => rd,
                    Err(_) => return Ok(out),
                };
                while let Some(entry) = rd.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        v.push(entry.path());
                    }
                }
                v
            }
        };
        for root in roots {
            let mut rd = match tokio::fs::read_dir(&root).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Some(entry) = rd.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                if let Ok(manifest) = self.read_manifest(&entry.path()).await {
                    out.push(manifest);
                }
            }
        }
        Ok(out)
    }
}

fn dir_size<'a>(dir: &'a Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64>> + 'a + Send>> {
    Box::pin(async move {
        let mut total = 0u64;
        let mut rd = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(0),
        };
        while let Some(entry) = rd.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                total += dir_size(&entry.path()).await?;
            } else {
                total += meta.len();
            }
        }
        Ok(total)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, BundleManager) {
        let dir = tempdir().unwrap();
        let mgr = BundleManager::new(dir.path().join("cache"), dir.path().join("tmp"));
        (dir, mgr)
    }

    #[tokio::test]
    async fn finalize_publishes_atomically() {
        let (_guard, mgr) = manager();
        let job_id = "job1";
        let tmp = mgr.create_tmp_dir(job_id).await.unwrap();
        let mut manifest = BundleManifest::new("key1", "url", "https://x", "v1", 0);
        manifest.status = BundleStatus::Completed;
        mgr.write_manifest("key1", "url", &mut manifest, Some(&tmp), 1)
            .await
            .unwrap();

        mgr.finalize_from_tmp(job_id, "key1", "url").await.unwrap();

        let final_dir = mgr.bundle_dir("url", "key1");
        assert!(final_dir.join("bundle.json").exists());
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn finalize_replaces_existing_bundle() {
        let (_guard, mgr) = manager();
        for job_id in ["job1", "job2"] {
            let tmp = mgr.create_tmp_dir(job_id).await.unwrap();
            let mut manifest = BundleManifest::new("key1", "url", "https://x", "v1", 0);
            mgr.write_manifest("key1", "url", &mut manifest, Some(&tmp), 1)
                .await
                .unwrap();
            mgr.finalize_from_tmp(job_id, "key1", "url").await.unwrap();
        }
        let final_dir = mgr.bundle_dir("url", "key1");
        assert!(final_dir.exists());
    }

    #[tokio::test]
    async fn add_artifact_records_size_and_hash() {
        let (_guard, mgr) = manager();
        let tmp = mgr.create_tmp_dir("job1").await.unwrap();
        let src = tmp.join("src.bin");
        tokio::fs::write(&src, b"hello").await.unwrap();

        let mut manifest = BundleManifest::new("key1", "url", "https://x", "v1", 0);
        mgr.add_artifact(&tmp, &mut manifest, "summary", &src, true)
            .await
            .unwrap();

        let info = manifest.artifacts.get("summary").unwrap();
        assert_eq!(info.size, 5);
        assert!(info.sha256.is_some());
    }

    #[tokio::test]
    async fn unknown_artifact_kind_is_rejected() {
        let (_guard, mgr) = manager();
        let tmp = mgr.create_tmp_dir("job1").await.unwrap();
        let src = tmp.join("src.bin");
        tokio::fs::write(&src, b"hello").await.unwrap();
        let mut manifest = BundleManifest::new("key1", "url", "https://x", "v1", 0);
        let err = mgr
            .add_artifact(&tmp, &mut manifest, "nonsense", &src, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}

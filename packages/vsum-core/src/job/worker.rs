use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::cache::bundle::{BundleManager, SourceMeta};
use crate::cache::service::CacheService;
use crate::cache::{is_sentinel_summary, key::SourceType};
use crate::error::{CoreError, Result};
use crate::job::queue::{Job, JobQueue};
use crate::job::task_factory;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::limits::PipelineLimits;
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::runner::PipelineRunner;
use crate::store::{CacheStatus, PersistenceStore};

/// Drives the job queue: each worker task pulls a job, runs its pipeline
/// end to end, and publishes the result. Workers are plain tokio tasks;
/// concurrency within a single run comes from the pipeline's own
/// category semaphores, not from running multiple workers.
pub struct JobWorker<S: PersistenceStore> {
    store: Arc<S>,
    cache: Arc<CacheService<S>>,
    bundles: Arc<BundleManager>,
    registry: Arc<StageRegistry>,
    queue: Arc<JobQueue>,
}

impl<S: PersistenceStore + 'static> JobWorker<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<CacheService<S>>,
        bundles: Arc<BundleManager>,
        limits: Arc<PipelineLimits>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            store,
            cache,
            bundles,
            registry: Arc::new(crate::pipeline::registry::default_registry(limits)),
            queue,
        }
    }

    /// Spawns `worker_count` tokio tasks, each looping on `queue.recv()`
    /// until the queue is stopped. Returns the task handles so the
    /// caller can await a clean shutdown.
    pub fn spawn_pool(self: Arc<Self>, worker_count: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..worker_count.max(1))
            .map(|idx| {
                let worker = self.clone();
                tokio::spawn(async move { worker.run_loop(idx).await })
            })
            .collect()
    }

    async fn run_loop(&self, worker_idx: usize) {
        loop {
            if self.queue.is_stopped() {
                return;
            }
            let Some(job) = self.queue.recv().await else {
                continue;
            };
            info!(worker = worker_idx, job_id = %job.job_id, "picked up job");
            if let Err(e) = self.execute(&job).await {
                error!(job_id = %job.job_id, error = %e, "job failed");
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        // 1. Mark the job and cache entry running.
        self.cache.update_job(&job.job_id, "running", None).await?;
        self.cache
            .update_status(&job.cache_key, CacheStatus::Running, None, None, None)
            .await?;

        match self.run_pipeline(job).await {
            Ok((summary_text, bundle_dir)) => {
                // 7. Write the bundle manifest into the tmp dir.
                if let Err(e) = self.write_manifest(job, &bundle_dir, &summary_text).await {
                    return self.fail(job, &format!("bundle_finalize_failed: {e}")).await;
                }
                // 8. Promote the tmp dir to the final bundle path.
                let source_type_str = job.source_type.as_str();
                if let Err(e) = self
                    .bundles
                    .finalize_from_tmp(&job.job_id, &job.cache_key, source_type_str)
                    .await
                {
                    return self
                        .fail(job, &format!("bundle_finalize_failed: {e}"))
                        .await;
                }
                // 9. Completed.
                self.cache
                    .update_status(
                        &job.cache_key,
                        CacheStatus::Completed,
                        Some(&summary_text),
                        None,
                        None,
                    )
                    .await?;
                self.cache.update_job(&job.job_id, "completed", None).await?;
                Ok(())
            }
            Err(e) => self.fail(job, &e.to_string()).await,
        }
    }

    async fn fail(&self, job: &Job, error: &str) -> Result<()> {
        warn!(job_id = %job.job_id, error, "job failed, cleaning up tmp dir");
        self.cache
            .update_status(&job.cache_key, CacheStatus::Failed, None, Some(error), None)
            .await?;
        self.cache.update_job(&job.job_id, "failed", Some(error)).await?;
        let tmp_dir = self.bundles.tmp_dir(&job.job_id);
        let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
        Ok(())
    }

    /// Steps 2-6: build the tmp dir and context, run the DAG, and
    /// validate the published summary. Returns the summary text and the
    /// tmp bundle directory on success.
    async fn run_pipeline(&self, job: &Job) -> Result<(String, std::path::PathBuf)> {
        // 2. Tmp working directory and pipeline context.
        let bundle_dir = self.bundles.create_tmp_dir(&job.job_id).await?;
        let source_type = match job.source_type.as_str() {
            "url" => SourceType::Url,
            "local" => SourceType::Local,
            other => {
                return Err(CoreError::InvalidInput(format!(
                    "unsupported job source_type: {other}"
                )))
            }
        };
        let mut ctx = PipelineContext::new(job.job_id.clone(), &job.source_type, bundle_dir.clone());
        ctx.source_url = job.source_url.clone();

        let local_input_type = if source_type == SourceType::Local {
            let (path, kind) = self.resolve_local_input(job).await?;
            match kind.as_str() {
                "video" => ctx.video_path = Some(path),
                "audio" => ctx.audio_path = Some(path),
                "subtitle" => ctx.subtitle_path = Some(path),
                other => {
                    return Err(CoreError::UnsupportedType(format!(
                        "unrecognized upload file_type: {other}"
                    )))
                }
            }
            ctx.local_input_type = Some(kind.clone());
            Some(kind)
        } else {
            None
        };

        // 3. Build the DAG for this job's flow.
        let config = task_factory::build_for_job(&job.source_type, local_input_type.as_deref())?;
        let graph = PipelineGraph::build(&config)?;
        let runner = PipelineRunner::build(graph, &self.registry)?;

        // 4. Run the pipeline.
        runner.run(&mut ctx).await?;

        // 5. Empty or sentinel summary is a failed run.
        let summary_text = ctx.summary_text.unwrap_or_default();
        if is_sentinel_summary(&summary_text) {
            return Err(CoreError::SummaryInvalid(
                "summary_text empty or sentinel".to_string(),
            ));
        }

        // 6. Validate summary.json schema against what was just written.
        let summary_json_path = bundle_dir.join("summary.json");
        let bytes = tokio::fs::read(&summary_json_path)
            .await
            .map_err(|e| CoreError::SummaryJsonInvalid(e.to_string()))?;
        let summary_json: crate::cache::service::SummaryJson = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::SummaryJsonInvalid(e.to_string()))?;
        if summary_json.summary_text.trim() != summary_text.trim() {
            return Err(CoreError::SummaryTextMismatch);
        }

        Ok((summary_text, bundle_dir))
    }

    /// Resolves the job's `file_id` through the upload store rather than
    /// guessing from a file extension; `file_type` is whatever
    /// `UploadStorage::save_stream` recorded at ingest time.
    async fn resolve_local_input(&self, job: &Job) -> Result<(std::path::PathBuf, String)> {
        let file_id = job
            .file_id
            .as_deref()
            .ok_or_else(|| CoreError::InvalidInput("local job requires file_id".to_string()))?;
        let upload = self
            .store
            .get_upload(file_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("upload {file_id}")))?;
        Ok((std::path::PathBuf::from(upload.stored_path), upload.file_type))
    }

    async fn write_manifest(
        &self,
        job: &Job,
        bundle_dir: &std::path::Path,
        summary_text: &str,
    ) -> Result<()> {
        let entry = self
            .store
            .get_cache_entry(&job.cache_key)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("cache entry {}", job.cache_key)))?;

        let mut manifest = crate::cache::bundle::BundleManifest::new(
            &job.cache_key,
            &job.source_type,
            &entry.source_ref,
            &entry.profile_version,
            Utc::now().timestamp(),
        );
        manifest.source_name = entry.source_name.clone();
        manifest.summary_text = Some(summary_text.to_string());
        manifest.status = crate::cache::bundle::BundleStatus::Completed;

        // Only artifacts a stage already wrote directly under bundle_dir
        // get recorded; uploaded local inputs stay outside the bundle
        // since they are raw input, not pipeline output.
        for kind in ["video", "audio", "subtitle", "asr", "summary"] {
            let name = crate::cache::bundle::canonical_artifact_name(kind)?;
            let path = bundle_dir.join(name);
            if path.exists() {
                record_existing_artifact(&mut manifest, kind, name, &path).await?;
            }
        }

        self.bundles
            .write_manifest(
                &job.cache_key,
                &job.source_type,
                &mut manifest,
                Some(bundle_dir),
                Utc::now().timestamp(),
            )
            .await?;

        self.bundles
            .write_source_meta(
                bundle_dir,
                &SourceMeta {
                    source_type: job.source_type.clone(),
                    source_ref: entry.source_ref.clone(),
                    source_name: entry.source_name.clone(),
                },
            )
            .await
    }
}

/// Records an artifact already sitting at its canonical path inside the
/// bundle directory. Unlike `BundleManager::add_artifact`, this never
/// copies: the stage that produced the file already wrote it in place.
async fn record_existing_artifact(
    manifest: &mut crate::cache::bundle::BundleManifest,
    kind: &str,
    name: &str,
    path: &std::path::Path,
) -> Result<()> {
    use sha2::{Digest, Sha256};
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    manifest.artifacts.insert(
        kind.to_string(),
        crate::cache::bundle::ArtifactInfo {
            path: name.to_string(),
            size: bytes.len() as u64,
            sha256: Some(hex::encode(hasher.finalize())),
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::bundle::BundleManager;
    use crate::cache::service::CacheService;
    use crate::config::Config;
    use crate::pipeline::limits::PipelineLimits;
    use crate::store::SqliteStore;

    async fn harness() -> (tempfile::TempDir, Arc<JobWorker<SqliteStore>>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::connect(&dir.path().join("s.db")).await.unwrap());
        let bundles = Arc::new(BundleManager::new(dir.path().join("cache"), dir.path().join("tmp")));
        let cache = Arc::new(CacheService::new(store.clone(), bundles.clone(), "v1".to_string()));
        let limits = Arc::new(PipelineLimits::from_config(&Config::default()));
        let queue = Arc::new(JobQueue::new());
        let worker = Arc::new(JobWorker::new(store, cache, bundles, limits, queue));
        (dir, worker)
    }

    #[tokio::test]
    async fn local_job_without_file_id_is_invalid_input() {
        let (_guard, worker) = harness().await;
        let job = Job {
            job_id: "job1".to_string(),
            cache_key: "k1".to_string(),
            source_type: "local".to_string(),
            source_url: None,
            file_id: None,
            file_hash: None,
            request_id: None,
        };
        let err = worker.resolve_local_input(&job).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}

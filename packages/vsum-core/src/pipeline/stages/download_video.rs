use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::StageHandler;

/// Downloads the source video to `dest_dir`, enforcing a size cap.
/// Implementations are an extractor-owned plugin point (yt-dlp or
/// similar); unlike subtitle fetch, a failure here is fatal.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    async fn fetch(
        &self,
        source_url: &str,
        dest_dir: &std::path::Path,
        max_size_bytes: u64,
    ) -> Result<PathBuf>;
}

/// No real downloader is wired in by default: fetching video from an
/// arbitrary extractor is exactly the kind of stage plugin this core
/// does not implement. Surfacing it as `PipelineStageUnavailable`
/// keeps the failure mode distinguishable from a genuine download
/// error once a real fetcher is injected.
pub struct UnavailableVideoFetcher;

#[async_trait]
impl VideoFetcher for UnavailableVideoFetcher {
    async fn fetch(
        &self,
        _source_url: &str,
        _dest_dir: &std::path::Path,
        _max_size_bytes: u64,
    ) -> Result<PathBuf> {
        Err(CoreError::PipelineStageUnavailable(
            "no video fetcher configured".to_string(),
        ))
    }
}

pub struct DownloadVideoStage {
    node_id: String,
    fetcher: Box<dyn VideoFetcher>,
    max_size_bytes: u64,
}

impl DownloadVideoStage {
    pub fn new(node_id: String, params: HashMap<String, JsonValue>) -> Self {
        let max_size_bytes = params
            .get("max_size_bytes")
            .and_then(|v| v.as_u64())
            .unwrap_or(4 * 1024 * 1024 * 1024);
        Self { node_id, fetcher: Box::new(UnavailableVideoFetcher), max_size_bytes }
    }

    pub fn with_fetcher(node_id: String, fetcher: Box<dyn VideoFetcher>, max_size_bytes: u64) -> Self {
        Self { node_id, fetcher, max_size_bytes }
    }
}

#[async_trait]
impl StageHandler for DownloadVideoStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["video_path"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let source_url = ctx.source_url.clone().ok_or_else(|| {
            CoreError::InvalidInput("DownloadVideo requires source_url".to_string())
        })?;
        let path = self
            .fetcher
            .fetch(&source_url, &ctx.bundle_dir, self.max_size_bytes)
            .await?;
        ctx.video_path = Some(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn ctx() -> PipelineContext {
        PipelineContext::new("r1".to_string(), "url", PathBuf::from("/tmp/b"))
    }

    #[tokio::test]
    async fn unavailable_fetcher_fails_the_stage() {
        let stage = DownloadVideoStage::new("d".to_string(), HashMap::new());
        let mut c = ctx();
        c.source_url = Some("https://example.com/v".to_string());
        let err = stage.run(&mut c).await.unwrap_err();
        assert!(matches!(err, CoreError::PipelineStageUnavailable(_)));
    }

    #[tokio::test]
    async fn missing_source_url_is_invalid_input() {
        let stage = DownloadVideoStage::new("d".to_string(), HashMap::new());
        let mut c = ctx();
        let err = stage.run(&mut c).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    struct FixedFetcher(PathBuf);

    #[async_trait]
    impl VideoFetcher for FixedFetcher {
        async fn fetch(&self, _u: &str, _d: &Path, _cap: u64) -> Result<PathBuf> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fetched_video_path_is_recorded() {
        let stage = DownloadVideoStage::with_fetcher(
            "d".to_string(),
            Box::new(FixedFetcher(PathBuf::from("/tmp/b/video.mp4"))),
            1024,
        );
        let mut c = ctx();
        c.source_url = Some("https://example.com/v".to_string());
        stage.run(&mut c).await.unwrap();
        assert_eq!(c.video_path, Some(PathBuf::from("/tmp/b/video.mp4")));
    }
}

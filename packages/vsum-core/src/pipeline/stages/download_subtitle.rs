use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::StageHandler;

/// Fetches whatever subtitle track a source publishes, if any. Real
/// implementations talk to the same extractor that resolved the
/// source's cache identity; this is an injected plugin point, not core
/// logic, so the default never finds anything.
#[async_trait]
pub trait SubtitleFetcher: Send + Sync {
    async fn fetch(&self, source_url: &str, dest_dir: &std::path::Path) -> Option<PathBuf>;
}

pub struct NoopSubtitleFetcher;

#[async_trait]
impl SubtitleFetcher for NoopSubtitleFetcher {
    async fn fetch(&self, _source_url: &str, _dest_dir: &std::path::Path) -> Option<PathBuf> {
        None
    }
}

pub struct DownloadSubtitleStage {
    node_id: String,
    fetcher: Box<dyn SubtitleFetcher>,
}

impl DownloadSubtitleStage {
    pub fn new(node_id: String, _params: HashMap<String, JsonValue>) -> Self {
        Self { node_id, fetcher: Box::new(NoopSubtitleFetcher) }
    }

    pub fn with_fetcher(node_id: String, fetcher: Box<dyn SubtitleFetcher>) -> Self {
        Self { node_id, fetcher }
    }
}

#[async_trait]
impl StageHandler for DownloadSubtitleStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["subtitle_path"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        // A missing subtitle is always a valid outcome: downstream
        // stages branch on `subtitle_valid`, not on this stage failing.
        let Some(source_url) = ctx.source_url.clone() else { return Ok(()) };
        if let Some(path) = self.fetcher.fetch(&source_url, &ctx.bundle_dir).await {
            ctx.subtitle_path = Some(path);
        }
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
    async fn noop_fetcher_leaves_subtitle_path_unset() {
        let stage = DownloadSubtitleStage::new("s".to_string(), HashMap::new());
        let mut c = ctx();
        c.source_url = Some("https://example.com/v".to_string());
        stage.run(&mut c).await.unwrap();
        assert!(c.subtitle_path.is_none());
    }

    struct FixedFetcher(PathBuf);

    #[async_trait]
    impl SubtitleFetcher for FixedFetcher {
        async fn fetch(&self, _source_url: &str, _dest_dir: &Path) -> Option<PathBuf> {
            Some(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fetched_subtitle_is_recorded() {
        let stage = DownloadSubtitleStage::with_fetcher(
            "s".to_string(),
            Box::new(FixedFetcher(PathBuf::from("/tmp/b/subtitle.srt"))),
        );
        let mut c = ctx();
        c.source_url = Some("https://example.com/v".to_string());
        stage.run(&mut c).await.unwrap();
        assert_eq!(c.subtitle_path, Some(PathBuf::from("/tmp/b/subtitle.srt")));
    }

    #[tokio::test]
    async fn no_source_url_is_a_noop() {
        let stage = DownloadSubtitleStage::new("s".to_string(), HashMap::new());
        let mut c = ctx();
        stage.run(&mut c).await.unwrap();
        assert!(c.subtitle_path.is_none());
    }
}

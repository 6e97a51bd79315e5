use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::StageHandler;

/// Produces `summary_text` from whichever transcript source validated
/// (subtitle or ASR). The model call itself is a plugin point; a call
/// that errors (network, LLM failure) is fatal, but an empty or
/// sentinel *result* is not — it is written to `summary.json` like any
/// other result and classified downstream by the job worker.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, max_input_chars: usize) -> Result<String>;
}

/// Deterministic stand-in: no network call, so the pipeline stays
/// self-contained without a real LLM wired in. It truncates to a lead
/// paragraph rather than fabricating a synthesized summary.
pub struct TruncatingSummarizer;

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(&self, text: &str, max_input_chars: usize) -> Result<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(String::new());
        }
        let truncated: String = trimmed.chars().take(max_input_chars).collect();
        Ok(truncated)
    }
}

#[derive(Serialize)]
struct SummaryJsonOut<'a> {
    summary_text: &'a str,
    model: &'a str,
    input_chars: usize,
    profile_version: &'a str,
}

pub struct TextSummarizeStage {
    node_id: String,
    summarizer: Box<dyn Summarizer>,
    model: String,
    profile_version: String,
    max_input_chars: usize,
}

impl TextSummarizeStage {
    pub fn new(node_id: String, params: HashMap<String, JsonValue>) -> Self {
        let model = params
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("truncate-v1")
            .to_string();
        let profile_version = params
            .get("profile_version")
            .and_then(|v| v.as_str())
            .unwrap_or("v1")
            .to_string();
        let max_input_chars = params
            .get("max_input_chars")
            .and_then(|v| v.as_u64())
            .unwrap_or(32_000) as usize;
        Self {
            node_id,
            summarizer: Box::new(TruncatingSummarizer),
            model,
            profile_version,
            max_input_chars,
        }
    }

    pub fn with_summarizer(
        node_id: String,
        summarizer: Box<dyn Summarizer>,
        model: String,
        profile_version: String,
        max_input_chars: usize,
    ) -> Self {
        Self { node_id, summarizer, model, profile_version, max_input_chars }
    }
}

#[async_trait]
impl StageHandler for TextSummarizeStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["summary_text"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let source_text = ctx
            .asr_data
            .as_ref()
            .map(|data| data.full_text())
            .unwrap_or_default();

        // An empty transcript has nothing to summarize; the summarizer is
        // skipped and an empty result is recorded like any other outcome,
        // leaving the sentinel/empty classification to the job worker.
        let summary_text = if source_text.trim().is_empty() {
            String::new()
        } else {
            self.summarizer.summarize(&source_text, self.max_input_chars).await?
        };

        let out = SummaryJsonOut {
            summary_text: &summary_text,
            model: &self.model,
            input_chars: source_text.chars().count(),
            profile_version: &self.profile_version,
        };
        let body = serde_json::to_vec_pretty(&out).map_err(CoreError::serialization)?;
        tokio::fs::create_dir_all(&ctx.bundle_dir).await?;
        tokio::fs::write(ctx.bundle_dir.join("summary.json"), body).await?;

        ctx.summary_text = Some(summary_text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::{AsrData, AsrDataSeg};
    use std::path::PathBuf;

    fn ctx() -> PipelineContext {
        PipelineContext::new("r1".to_string(), "local", PathBuf::from("/tmp/b"))
    }

    struct FixedSummarizer(String);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _text: &str, _max_input_chars: usize) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn empty_transcript_writes_an_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        let stage = TextSummarizeStage::new("s".to_string(), HashMap::new());
        let mut c = ctx();
        c.bundle_dir = dir.path().to_path_buf();
        stage.run(&mut c).await.unwrap();

        assert_eq!(c.summary_text, Some(String::new()));
        assert!(dir.path().join("summary.json").exists());
    }

    #[tokio::test]
    async fn sentinel_summary_is_written_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stage = TextSummarizeStage::with_summarizer(
            "s".to_string(),
            Box::new(FixedSummarizer("无法生成摘要".to_string())),
            "m".to_string(),
            "v1".to_string(),
            1000,
        );
        let mut c = ctx();
        c.bundle_dir = dir.path().to_path_buf();
        c.asr_data = Some(AsrData::new(vec![AsrDataSeg::new("hello world", 0, 1000)]));
        stage.run(&mut c).await.unwrap();

        assert_eq!(c.summary_text, Some("无法生成摘要".to_string()));
        let body = std::fs::read_to_string(dir.path().join("summary.json")).unwrap();
        assert!(body.contains("无法生成摘要"));
    }

    #[tokio::test]
    async fn writes_summary_json_and_records_text() {
        let dir = tempfile::tempdir().unwrap();
        let stage = TextSummarizeStage::with_summarizer(
            "s".to_string(),
            Box::new(FixedSummarizer("a short summary".to_string())),
            "m1".to_string(),
            "v2".to_string(),
            1000,
        );
        let mut c = ctx();
        c.bundle_dir = dir.path().to_path_buf();
        c.asr_data = Some(AsrData::new(vec![AsrDataSeg::new("hello world", 0, 1000)]));
        stage.run(&mut c).await.unwrap();

        assert_eq!(c.summary_text, Some("a short summary".to_string()));
        let body = std::fs::read_to_string(dir.path().join("summary.json")).unwrap();
        assert!(body.contains("a short summary"));
        assert!(body.contains("v2"));
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::asr::{estimate_token_count, AsrEngine, NullAsrEngine};
use crate::error::{CoreError, Result};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::limits::PipelineLimits;
use crate::pipeline::stage::StageHandler;

/// Runs ASR over `audio_path` and persists the result as `asr.json`.
/// Transcription is the expensive, rate-limited step: it is bounded by
/// the process-wide transcribe semaphore, and its failure is fatal
/// since nothing downstream has text to summarize.
pub struct TranscribeStage {
    node_id: String,
    engine: Box<dyn AsrEngine>,
    limits: Option<Arc<PipelineLimits>>,
}

impl TranscribeStage {
    pub fn new(node_id: String, _params: HashMap<String, JsonValue>) -> Self {
        Self { node_id, engine: Box::new(NullAsrEngine), limits: None }
    }

    pub fn with_engine(node_id: String, engine: Box<dyn AsrEngine>, limits: Option<Arc<PipelineLimits>>) -> Self {
        Self { node_id, engine, limits }
    }
}

#[async_trait]
impl StageHandler for TranscribeStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["asr_data", "transcript_token_count", "transcript_segment_count"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        // A subtitle already validated the transcript; nothing left to do.
        if ctx.subtitle_valid == Some(true) {
            return Ok(());
        }

        let audio_path = ctx.audio_path.clone().ok_or_else(|| {
            CoreError::InvalidInput("Transcribe requires audio_path".to_string())
        })?;

        let _permit = match &self.limits {
            Some(limits) => Some(limits.acquire_transcribe().await?),
            None => None,
        };

        let data = self.engine.transcribe(&audio_path).await?;

        let token_count: u64 = data.segments.iter().map(|s| estimate_token_count(&s.text)).sum();
        ctx.transcript_segment_count = Some(data.len() as u32);
        ctx.transcript_token_count = Some(token_count);

        let json_path = ctx.bundle_dir.join("asr.json");
        let body = serde_json::to_vec_pretty(&data).map_err(CoreError::serialization)?;
        tokio::fs::create_dir_all(&ctx.bundle_dir).await?;
        tokio::fs::write(&json_path, body).await?;

        ctx.asr_data = Some(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::{AsrData, AsrDataSeg};
    use std::path::{Path, PathBuf};

    fn ctx() -> PipelineContext {
        PipelineContext::new("r1".to_string(), "local", PathBuf::from("/tmp/b"))
    }

    struct FixedEngine(AsrData);

    #[async_trait]
    impl AsrEngine for FixedEngine {
        async fn transcribe(&self, _audio_path: &Path) -> Result<AsrData> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn skips_when_subtitle_already_valid() {
        let stage = TranscribeStage::new("t".to_string(), HashMap::new());
        let mut c = ctx();
        c.subtitle_valid = Some(true);
        stage.run(&mut c).await.unwrap();
        assert!(c.asr_data.is_none());
    }

    #[tokio::test]
    async fn missing_audio_path_is_invalid_input() {
        let stage = TranscribeStage::new("t".to_string(), HashMap::new());
        let mut c = ctx();
        let err = stage.run(&mut c).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn transcribes_and_persists_asr_json() {
        let dir = tempfile::tempdir().unwrap();
        let data = AsrData::new(vec![AsrDataSeg::new("hello world", 0, 1000)]);
        let stage = TranscribeStage::with_engine("t".to_string(), Box::new(FixedEngine(data)), None);
        let mut c = ctx();
        c.bundle_dir = dir.path().to_path_buf();
        c.audio_path = Some(dir.path().join("audio.wav"));
        stage.run(&mut c).await.unwrap();

        assert_eq!(c.transcript_segment_count, Some(1));
        assert_eq!(c.transcript_token_count, Some(2));
        assert!(dir.path().join("asr.json").exists());
    }
}

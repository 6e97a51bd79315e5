use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::limits::PipelineLimits;
use crate::pipeline::stage::StageHandler;

/// Extracts a mono 16kHz WAV track from `video_path` via `ffmpeg`,
/// bounded by the process-wide transcode semaphore. Converter failure
/// is fatal: there is nothing downstream can do without audio.
pub struct ExtractAudioStage {
    node_id: String,
    limits: Option<Arc<PipelineLimits>>,
    audio_track_index: Option<u32>,
}

impl ExtractAudioStage {
    pub fn new(node_id: String, params: HashMap<String, JsonValue>) -> Self {
        let audio_track_index = params.get("audio_track_index").and_then(|v| v.as_u64()).map(|v| v as u32);
        Self { node_id, limits: None, audio_track_index }
    }

    pub fn with_limits(node_id: String, limits: Arc<PipelineLimits>, audio_track_index: Option<u32>) -> Self {
        Self { node_id, limits: Some(limits), audio_track_index }
    }
}

#[async_trait]
impl StageHandler for ExtractAudioStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["audio_path"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let video_path = ctx.video_path.clone().ok_or_else(|| {
            CoreError::InvalidInput("ExtractAudio requires video_path".to_string())
        })?;

        let _permit = match &self.limits {
            Some(limits) => Some(limits.acquire_transcode().await?),
            None => None,
        };

        let audio_path = ctx.bundle_dir.join("audio.wav");
        tokio::fs::create_dir_all(&ctx.bundle_dir).await?;

        let mut cmd = tokio::process::Command::new("ffmpeg");
        cmd.args(["-y", "-i"]).arg(&video_path);
        if let Some(track) = self.audio_track_index {
            cmd.arg("-map").arg(format!("0:a:{track}"));
        }
        cmd.args(["-ac", "1", "-ar", "16000", "-vn"]).arg(&audio_path);

        let output = cmd
            .output()
            .await
            .map_err(|e| CoreError::Other(anyhow::anyhow!("failed to launch ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(CoreError::Other(anyhow::anyhow!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        ctx.audio_path = Some(audio_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_video_path_is_invalid_input() {
        let stage = ExtractAudioStage::new("e".to_string(), HashMap::new());
        let mut ctx = PipelineContext::new("r1".to_string(), "local", PathBuf::from("/tmp/b"));
        let err = stage.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}

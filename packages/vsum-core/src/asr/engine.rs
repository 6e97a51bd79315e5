use async_trait::async_trait;
use std::path::Path;

use crate::asr::data::AsrData;
use crate::error::Result;

/// Abstraction over a transcription backend. Real implementations talk
/// to a remote chunked-upload-and-poll service, an OpenAI-compatible
/// speech endpoint, or a local binary run as a subprocess; all of them
/// resolve to the same [`AsrData`] shape so the rest of the pipeline
/// never needs to know which one produced it.
#[async_trait]
pub trait AsrEngine: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<AsrData>;
}

/// A deterministic, network-free engine used by tests and local
/// development. It "transcribes" silence as an empty transcript and
/// anything else as a single placeholder segment spanning the whole
/// file, sized from the file's byte length so tests can still exercise
/// token-count and duration-dependent downstream logic.
pub struct NullAsrEngine;

#[async_trait]
impl AsrEngine for NullAsrEngine {
    async fn transcribe(&self, audio_path: &Path) -> Result<AsrData> {
        let metadata = tokio::fs::metadata(audio_path).await?;
        if metadata.len() == 0 {
            return Ok(AsrData::default());
        }
        let assumed_duration_ms = ((metadata.len() / 16_000).max(1)) as i64 * 1000;
        Ok(AsrData::new(vec![crate::asr::data::AsrDataSeg::new(
            "[unrecognized audio]",
            0,
            assumed_duration_ms,
        )]))
    }
}

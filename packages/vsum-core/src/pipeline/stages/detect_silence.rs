use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::StageHandler;

/// Decides whether a run produced "nothing to transcribe" from the
/// transcript's token rate (tokens per minute of video), not from audio
/// loudness: a track can be loud and still silent of speech (music,
/// ambient noise). RMS is measured as a secondary diagnostic only.
/// Never fatal: a missing transcript or duration just reads as silent.
#[async_trait]
pub trait AudioLevelProbe: Send + Sync {
    async fn rms(&self, audio_path: &Path) -> f64;
}

/// Reads the WAV file's PCM16 samples directly and computes root-mean-
/// square amplitude, normalized to `[0, 1]`. Tolerant of a non-WAV or
/// truncated file: any header/alignment problem just yields `0.0`.
pub struct WavRmsProbe;

#[async_trait]
impl AudioLevelProbe for WavRmsProbe {
    async fn rms(&self, audio_path: &Path) -> f64 {
        let Ok(bytes) = tokio::fs::read(audio_path).await else { return 0.0 };
        compute_pcm16_rms(&bytes)
    }
}

/// Skips the canonical 44-byte WAV header when present; falls back to
/// treating the whole buffer as PCM16 samples otherwise.
fn compute_pcm16_rms(bytes: &[u8]) -> f64 {
    let data = if bytes.len() > 44 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        &bytes[44..]
    } else {
        bytes
    };

    if data.len() < 2 {
        return 0.0;
    }

    let samples: Vec<i16> = data
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms / i16::MAX as f64).clamp(0.0, 1.0)
}

pub struct DetectSilenceStage {
    node_id: String,
    probe: Box<dyn AudioLevelProbe>,
}

impl DetectSilenceStage {
    pub fn new(node_id: String, _params: HashMap<String, JsonValue>) -> Self {
        Self { node_id, probe: Box::new(WavRmsProbe) }
    }

    pub fn with_probe(node_id: String, probe: Box<dyn AudioLevelProbe>) -> Self {
        Self { node_id, probe }
    }
}

#[async_trait]
impl StageHandler for DetectSilenceStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["is_silent", "audio_rms", "tokens_per_minute"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        ctx.audio_rms = match &ctx.audio_path {
            Some(path) => Some(self.probe.rms(path).await),
            None => Some(0.0),
        };

        let tokens_per_minute = match (ctx.transcript_token_count, ctx.video_duration) {
            (Some(tokens), Some(duration)) if duration > 0.0 => {
                Some(tokens as f64 / (duration / 60.0))
            }
            _ => None,
        };
        ctx.tokens_per_minute = tokens_per_minute;

        // Missing transcript or duration reads as silent: nothing to rate.
        ctx.is_silent = Some(match tokens_per_minute {
            Some(rate) => rate < ctx.thresholds.transcript_tokens_per_min_min,
            None => true,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx() -> PipelineContext {
        PipelineContext::new("r1".to_string(), "local", PathBuf::from("/tmp/b"))
    }

    struct FixedProbe(f64);

    #[async_trait]
    impl AudioLevelProbe for FixedProbe {
        async fn rms(&self, _audio_path: &Path) -> f64 {
            self.0
        }
    }

    #[tokio::test]
    async fn sparse_transcript_is_marked_silent() {
        let stage = DetectSilenceStage::with_probe("d".to_string(), Box::new(FixedProbe(0.5)));
        let mut c = ctx();
        c.audio_path = Some(PathBuf::from("/tmp/b/audio.wav"));
        c.transcript_token_count = Some(60);
        c.video_duration = Some(60.0 * 60.0); // 1 token/min, below the 3.0 default
        stage.run(&mut c).await.unwrap();
        assert_eq!(c.is_silent, Some(true));
        assert_eq!(c.audio_rms, Some(0.5));
    }

    #[tokio::test]
    async fn dense_transcript_is_not_silent() {
        let stage = DetectSilenceStage::with_probe("d".to_string(), Box::new(FixedProbe(0.001)));
        let mut c = ctx();
        c.audio_path = Some(PathBuf::from("/tmp/b/audio.wav"));
        c.transcript_token_count = Some(600);
        c.video_duration = Some(60.0); // 600 token/min, well above the threshold
        stage.run(&mut c).await.unwrap();
        assert_eq!(c.is_silent, Some(false));
    }

    #[tokio::test]
    async fn missing_transcript_data_reads_as_silent() {
        let stage = DetectSilenceStage::new("d".to_string(), HashMap::new());
        let mut c = ctx();
        stage.run(&mut c).await.unwrap();
        assert_eq!(c.is_silent, Some(true));
        assert_eq!(c.tokens_per_minute, None);
        assert_eq!(c.audio_rms, Some(0.0));
    }

    #[tokio::test]
    async fn tokens_per_minute_derived_from_duration_and_token_count() {
        let stage = DetectSilenceStage::with_probe("d".to_string(), Box::new(FixedProbe(0.2)));
        let mut c = ctx();
        c.audio_path = Some(PathBuf::from("/tmp/b/audio.wav"));
        c.transcript_token_count = Some(120);
        c.video_duration = Some(60.0);
        stage.run(&mut c).await.unwrap();
        assert_eq!(c.tokens_per_minute, Some(120.0));
    }

    #[test]
    fn rms_of_silence_is_zero() {
        let silence = vec![0u8; 2000];
        assert_eq!(compute_pcm16_rms(&silence), 0.0);
    }

    #[test]
    fn rms_of_full_scale_tone_is_near_one() {
        let mut data = Vec::new();
        for _ in 0..1000 {
            data.extend_from_slice(&i16::MAX.to_le_bytes());
        }
        assert!(compute_pcm16_rms(&data) > 0.99);
    }
}

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::StageHandler;

#[derive(Debug, Clone, Default)]
pub struct VideoMetadata {
    pub duration: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub bitrate: Option<u64>,
}

/// Probes a local media file for duration and stream geometry. Remote
/// probing for `url` sources (via the extractor that owns the URL) is
/// an external stage-plugin concern and is left unimplemented here.
#[async_trait]
pub trait MetadataProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<VideoMetadata>;
}

/// Shells out to `ffprobe`, the same dependency-free approach used for
/// audio extraction in [`super::extract_audio`].
pub struct FfprobeProber;

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Deserialize, Default)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Deserialize, Default)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[async_trait]
impl MetadataProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<VideoMetadata> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| CoreError::Other(anyhow::anyhow!("failed to launch ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(CoreError::Other(anyhow::anyhow!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(CoreError::serialization)?;

        let video_stream = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));

        Ok(VideoMetadata {
            duration: parsed
                .format
                .duration
                .as_deref()
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0),
            width: video_stream.and_then(|s| s.width),
            height: video_stream.and_then(|s| s.height),
            fps: video_stream.and_then(|s| s.r_frame_rate.as_deref()).and_then(parse_frame_rate),
            bitrate: parsed.format.bit_rate.as_deref().and_then(|b| b.parse().ok()),
        })
    }
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

pub struct FetchMetadataStage {
    node_id: String,
    prober: Box<dyn MetadataProber>,
}

impl FetchMetadataStage {
    pub fn new(node_id: String, _params: HashMap<String, JsonValue>) -> Self {
        Self { node_id, prober: Box::new(FfprobeProber) }
    }

    pub fn with_prober(node_id: String, prober: Box<dyn MetadataProber>) -> Self {
        Self { node_id, prober }
    }
}

#[async_trait]
impl StageHandler for FetchMetadataStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["video_duration", "video_width", "video_height", "video_fps", "video_bitrate"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let path = match ctx.video_path.clone() {
            Some(p) => p,
            // URL-flow metadata is sourced through the extractor plugin,
            // not by probing a file that may not exist yet.
            None => return Ok(()),
        };

        let meta = self.prober.probe(&path).await?;
        ctx.video_duration = Some(meta.duration);
        ctx.video_width = meta.width;
        ctx.video_height = meta.height;
        ctx.video_fps = meta.fps;
        ctx.video_bitrate = meta.bitrate;
        Ok(())
    }
}

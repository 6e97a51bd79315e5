use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::StageHandler;

/// Scores parsed subtitle coverage against the video's duration.
/// Coverage is the fraction of the video's runtime the subtitle
/// segments span; density is characters per second of covered time.
/// Never fatal: an absent or empty transcript just means `subtitle_valid = false`.
pub struct ValidateSubtitleStage {
    node_id: String,
}

impl ValidateSubtitleStage {
    pub fn new(node_id: String, _params: HashMap<String, JsonValue>) -> Self {
        Self { node_id }
    }
}

#[async_trait]
impl StageHandler for ValidateSubtitleStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["subtitle_valid", "subtitle_coverage_ratio", "subtitle_density"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let Some(data) = ctx.asr_data.clone() else {
            ctx.subtitle_valid = Some(false);
            ctx.subtitle_coverage_ratio = Some(0.0);
            ctx.subtitle_density = Some(0.0);
            return Ok(());
        };

        if !data.has_data() {
            ctx.subtitle_valid = Some(false);
            ctx.subtitle_coverage_ratio = Some(0.0);
            ctx.subtitle_density = Some(0.0);
            return Ok(());
        }

        let covered_ms: i64 = data.segments.iter().map(|s| (s.end_time - s.start_time).max(0)).sum();
        let video_duration_ms = ctx.video_duration.unwrap_or(0.0) * 1000.0;

        let coverage_ratio = if video_duration_ms > 0.0 {
            (covered_ms as f64 / video_duration_ms).min(1.0)
        } else {
            0.0
        };

        let covered_seconds = (covered_ms as f64 / 1000.0).max(0.001);
        let density = data.total_chars() as f64 / covered_seconds;

        ctx.subtitle_coverage_ratio = Some(coverage_ratio);
        ctx.subtitle_density = Some(density);
        ctx.subtitle_valid = Some(coverage_ratio >= ctx.thresholds.subtitle_coverage_min);

        Ok(())
    }
}

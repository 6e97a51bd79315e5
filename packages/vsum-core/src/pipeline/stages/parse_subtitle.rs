use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::asr::data::{AsrData, AsrDataSeg};
use crate::error::Result;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::StageHandler;

/// Parses a downloaded subtitle file into [`AsrData`]. Parse failure
/// is never fatal: a subtitle that can't be read just means validation
/// downstream will mark it invalid.
pub struct ParseSubtitleStage {
    node_id: String,
}

impl ParseSubtitleStage {
    pub fn new(node_id: String, _params: HashMap<String, JsonValue>) -> Self {
        Self { node_id }
    }
}

#[async_trait]
impl StageHandler for ParseSubtitleStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["asr_data", "subtitle_segment_count"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let Some(path) = ctx.subtitle_path.clone() else {
            ctx.asr_data = None;
            return Ok(());
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let data = parse_srt(&content);
                ctx.subtitle_segment_count = Some(data.len() as u32);
                ctx.asr_data = Some(data);
            }
            Err(_) => {
                ctx.asr_data = None;
            }
        }
        Ok(())
    }
}

/// A permissive SRT reader: index line, a `HH:MM:SS,mmm --> HH:MM:SS,mmm`
/// timestamp line, then one or more text lines, blocks separated by a
/// blank line. Anything that doesn't match the timestamp pattern is
/// skipped rather than treated as a parse failure.
fn parse_srt(content: &str) -> AsrData {
    let mut segments = Vec::new();

    for block in content.replace("\r\n", "\n").split("\n\n") {
        let lines: Vec<&str> = block.trim().lines().collect();
        if lines.len() < 2 {
            continue;
        }
        let timestamp_line = if lines[0].contains("-->") { lines[0] } else if lines.len() > 1 && lines[1].contains("-->") { lines[1] } else { continue };
        let text_start = if lines[0].contains("-->") { 1 } else { 2 };

        let Some((start, end)) = parse_srt_timestamp_line(timestamp_line) else { continue };
        if text_start > lines.len() {
            continue;
        }
        let text = lines[text_start..].join(" ").trim().to_string();
        if text.is_empty() {
            continue;
        }
        segments.push(AsrDataSeg::new(text, start, end));
    }

    AsrData::new(segments)
}

fn parse_srt_timestamp_line(line: &str) -> Option<(i64, i64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_srt_time(start.trim())?, parse_srt_time(end.trim())?))
}

fn parse_srt_time(raw: &str) -> Option<i64> {
    let raw = raw.replace(',', ".");
    let (hms, ms) = raw.split_once('.')?;
    let mut parts = hms.split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: i64 = parts.next()?.parse().ok()?;
    let ms: i64 = ms.parse().ok()?;
    Some(h * 3_600_000 + m * 60_000 + s * 1000 + ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx() -> PipelineContext {
        PipelineContext::new("r1".to_string(), "url", PathBuf::from("/tmp/b"))
    }

    #[tokio::test]
    async fn missing_subtitle_path_yields_no_data() {
        let stage = ParseSubtitleStage::new("p".to_string(), HashMap::new());
        let mut c = ctx();
        stage.run(&mut c).await.unwrap();
        assert!(c.asr_data.is_none());
    }

    #[tokio::test]
    async fn nonexistent_file_is_non_fatal() {
        let stage = ParseSubtitleStage::new("p".to_string(), HashMap::new());
        let mut c = ctx();
        c.subtitle_path = Some(PathBuf::from("/nonexistent/path.srt"));
        stage.run(&mut c).await.unwrap();
        assert!(c.asr_data.is_none());
    }

    #[tokio::test]
    async fn parses_a_well_formed_srt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.srt");
        tokio::fs::write(
            &path,
            "1\n00:00:00,000 --> 00:00:02,500\nHello there\n\n2\n00:00:02,500 --> 00:00:05,000\nGeneral Kenobi\n",
        )
        .await
        .unwrap();

        let stage = ParseSubtitleStage::new("p".to_string(), HashMap::new());
        let mut c = ctx();
        c.subtitle_path = Some(path);
        stage.run(&mut c).await.unwrap();

        let data = c.asr_data.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.segments[0].text, "Hello there");
        assert_eq!(data.segments[0].start_time, 0);
        assert_eq!(data.segments[1].start_time, 2500);
        assert_eq!(c.subtitle_segment_count, Some(2));
    }

    #[test]
    fn timestamp_parsing() {
        assert_eq!(parse_srt_time("00:01:02,500"), Some(62_500));
        assert_eq!(parse_srt_time("garbage"), None);
    }
}

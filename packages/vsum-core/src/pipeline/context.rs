use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::pipeline::condition::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub node_id: String,
    pub status: TraceStatus,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    pub output_keys: Option<Vec<String>>,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Thresholds {
    pub subtitle_coverage_min: f64,
    pub transcript_tokens_per_min_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            subtitle_coverage_min: 0.6,
            transcript_tokens_per_min_min: 3.0,
        }
    }
}

/// Carried through the runner. Stages read and write fields here and
/// communicate with each other only through this struct and the
/// filesystem under `bundle_dir`.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub run_id: String,
    pub source_type: String,
    pub source_url: Option<String>,
    pub video_path: Option<PathBuf>,
    pub subtitle_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub bundle_dir: PathBuf,

    pub local_input_type: Option<String>,
    pub video_duration: Option<f64>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub video_fps: Option<f64>,
    pub video_bitrate: Option<u64>,

    pub asr_data: Option<crate::asr::data::AsrData>,
    pub subtitle_segment_count: Option<u32>,
    pub subtitle_valid: Option<bool>,
    pub subtitle_coverage_ratio: Option<f64>,
    pub subtitle_density: Option<f64>,

    pub is_silent: Option<bool>,
    pub audio_rms: Option<f64>,
    pub tokens_per_minute: Option<f64>,

    pub transcript_token_count: Option<u64>,
    pub transcript_segment_count: Option<u32>,
    pub summary_text: Option<String>,

    pub thresholds: Thresholds,
    pub extra: HashMap<String, JsonValue>,
    pub trace: Vec<TraceEvent>,
}

impl PipelineContext {
    pub fn new(run_id: String, source_type: &str, bundle_dir: PathBuf) -> Self {
        Self {
            run_id,
            source_type: source_type.to_string(),
            source_url: None,
            video_path: None,
            subtitle_path: None,
            audio_path: None,
            bundle_dir,
            local_input_type: None,
            video_duration: None,
            video_width: None,
            video_height: None,
            video_fps: None,
            video_bitrate: None,
            asr_data: None,
            subtitle_segment_count: None,
            subtitle_valid: None,
            subtitle_coverage_ratio: None,
            subtitle_density: None,
            is_silent: None,
            audio_rms: None,
            tokens_per_minute: None,
            transcript_token_count: None,
            transcript_segment_count: None,
            summary_text: None,
            thresholds: Thresholds::default(),
            extra: HashMap::new(),
            trace: Vec::new(),
        }
    }

    /// The namespace exposed to the condition evaluator. This is the
    /// authoritative list of variable names conditions may reference.
    pub fn eval_namespace(&self) -> HashMap<String, Value> {
        let mut ns = HashMap::new();
        ns.insert("source_type".to_string(), Value::Str(self.source_type.clone()));
        ns.insert(
            "local_input_type".to_string(),
            self.local_input_type
                .clone()
                .map(Value::Str)
                .unwrap_or(Value::None),
        );
        ns.insert(
            "video_duration".to_string(),
            self.video_duration.map(Value::Num).unwrap_or(Value::None),
        );
        ns.insert(
            "subtitle_valid".to_string(),
            self.subtitle_valid.map(Value::Bool).unwrap_or(Value::None),
        );
        ns.insert(
            "subtitle_coverage_ratio".to_string(),
            self.subtitle_coverage_ratio.map(Value::Num).unwrap_or(Value::None),
        );
        ns.insert(
            "subtitle_density".to_string(),
            self.subtitle_density.map(Value::Num).unwrap_or(Value::None),
        );
        ns.insert(
            "is_silent".to_string(),
            self.is_silent.map(Value::Bool).unwrap_or(Value::None),
        );
        ns.insert(
            "audio_rms".to_string(),
            self.audio_rms.map(Value::Num).unwrap_or(Value::None),
        );
        ns.insert(
            "tokens_per_minute".to_string(),
            self.tokens_per_minute.map(Value::Num).unwrap_or(Value::None),
        );
        ns.insert(
            "transcript_token_count".to_string(),
            self.transcript_token_count
                .map(|v| Value::Num(v as f64))
                .unwrap_or(Value::None),
        );
        ns.insert(
            "subtitle_coverage_min".to_string(),
            Value::Num(self.thresholds.subtitle_coverage_min),
        );
        ns.insert(
            "summary_text".to_string(),
            self.summary_text.clone().map(Value::Str).unwrap_or(Value::None),
        );
        ns
    }
}

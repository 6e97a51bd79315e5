use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::pipeline::limits::PipelineLimits;
use crate::pipeline::stage::StageHandler;

type Factory = Arc<dyn Fn(String, HashMap<String, JsonValue>) -> Box<dyn StageHandler> + Send + Sync>;

/// Maps a node's declared `type` string to a constructor for its
/// [`StageHandler`]. A name that isn't registered fails graph
/// construction rather than execution.
#[derive(Clone)]
pub struct StageRegistry {
    factories: HashMap<String, Factory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register<F>(mut self, type_name: &str, factory: F) -> Self
    where
        F: Fn(String, HashMap<String, JsonValue>) -> Box<dyn StageHandler> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.to_string(), Arc::new(factory));
        self
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn registered_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn create(
        &self,
        type_name: &str,
        node_id: &str,
        params: HashMap<String, JsonValue>,
    ) -> Result<Box<dyn StageHandler>> {
        let factory = self.factories.get(type_name).ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "unregistered stage type: {type_name}, available: {:?}",
                self.registered_types()
            ))
        })?;
        Ok(factory(node_id.to_string(), params))
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers every built-in stage. Called once when a runner is built
/// from configuration. `limits` is shared by the two stages that gate
/// on a process-wide category semaphore (extract-audio on transcode,
/// transcribe on transcribe); every other stage ignores it.
pub fn default_registry(limits: Arc<PipelineLimits>) -> StageRegistry {
    use crate::pipeline::stages::*;

    let extract_audio_limits = limits.clone();
    let transcribe_limits = limits;

    StageRegistry::new()
        .register("InputNode", |id, params| {
            Box::new(input::InputStage::new(id, params))
        })
        .register("FetchMetadataNode", |id, params| {
            Box::new(fetch_metadata::FetchMetadataStage::new(id, params))
        })
        .register("DownloadSubtitleNode", |id, params| {
            Box::new(download_subtitle::DownloadSubtitleStage::new(id, params))
        })
        .register("DownloadVideoNode", |id, params| {
            Box::new(download_video::DownloadVideoStage::new(id, params))
        })
        .register("ParseSubtitleNode", |id, params| {
            Box::new(parse_subtitle::ParseSubtitleStage::new(id, params))
        })
        .register("ValidateSubtitleNode", |id, params| {
            Box::new(validate_subtitle::ValidateSubtitleStage::new(id, params))
        })
        .register("ExtractAudioNode", move |id, params| {
            let audio_track_index = params
                .get("audio_track_index")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            Box::new(extract_audio::ExtractAudioStage::with_limits(
                id,
                extract_audio_limits.clone(),
                audio_track_index,
            ))
        })
        .register("DetectSilenceNode", |id, params| {
            Box::new(detect_silence::DetectSilenceStage::new(id, params))
        })
        .register("TranscribeNode", move |id, _params| {
            Box::new(transcribe::TranscribeStage::with_engine(
                id,
                Box::new(crate::asr::NullAsrEngine),
                Some(transcribe_limits.clone()),
            ))
        })
        .register("TextSummarizeNode", |id, params| {
            Box::new(text_summarize::TextSummarizeStage::new(id, params))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_limits() -> Arc<PipelineLimits> {
        Arc::new(PipelineLimits::from_config(&Config::default()))
    }

    #[test]
    fn unregistered_type_is_rejected() {
        let registry = default_registry(test_limits());
        assert!(registry.create("GhostNode", "n1", HashMap::new()).is_err());
    }

    #[test]
    fn builtin_stages_are_registered() {
        let registry = default_registry(test_limits());
        for t in [
            "InputNode",
            "FetchMetadataNode",
            "DownloadSubtitleNode",
            "DownloadVideoNode",
            "ParseSubtitleNode",
            "ValidateSubtitleNode",
            "ExtractAudioNode",
            "DetectSilenceNode",
            "TranscribeNode",
            "TextSummarizeNode",
        ] {
            assert!(registry.has_type(t), "missing stage type {t}");
        }
    }
}

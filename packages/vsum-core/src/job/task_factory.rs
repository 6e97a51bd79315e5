use crate::error::{CoreError, Result};
use crate::pipeline::graph::{PipelineConfig, PipelineEdgeConfig, PipelineNodeConfig};

fn node(id: &str, type_name: &str) -> PipelineNodeConfig {
    PipelineNodeConfig {
        id: id.to_string(),
        type_name: type_name.to_string(),
        params: Default::default(),
    }
}

fn edge(source: &str, target: &str, condition: Option<&str>) -> PipelineEdgeConfig {
    PipelineEdgeConfig {
        source: source.to_string(),
        target: target.to_string(),
        condition: condition.map(String::from),
    }
}

/// `input → fetch_metadata` and `input → download_subtitle → parse_subtitle
/// → validate_subtitle`, joined on `fetch_metadata`; a valid subtitle goes
/// straight to summarization, otherwise the video is downloaded and
/// transcribed.
fn build_url_flow() -> PipelineConfig {
    PipelineConfig {
        nodes: vec![
            node("input", "InputNode"),
            node("fetch_metadata", "FetchMetadataNode"),
            node("download_subtitle", "DownloadSubtitleNode"),
            node("parse_subtitle", "ParseSubtitleNode"),
            node("validate_subtitle", "ValidateSubtitleNode"),
            node("download_video", "DownloadVideoNode"),
            node("extract_audio", "ExtractAudioNode"),
            node("detect_silence", "DetectSilenceNode"),
            node("transcribe", "TranscribeNode"),
            node("text_summarize", "TextSummarizeNode"),
        ],
        edges: vec![
            edge("input", "fetch_metadata", None),
            edge("input", "download_subtitle", None),
            edge("download_subtitle", "parse_subtitle", None),
            edge("fetch_metadata", "validate_subtitle", None),
            edge("parse_subtitle", "validate_subtitle", None),
            edge("validate_subtitle", "text_summarize", Some("subtitle_valid == True")),
            edge("validate_subtitle", "download_video", Some("subtitle_valid == False")),
            edge("download_video", "extract_audio", None),
            edge("extract_audio", "detect_silence", None),
            edge("transcribe", "detect_silence", None),
            edge("extract_audio", "transcribe", None),
            edge("detect_silence", "text_summarize", None),
        ],
        entrypoint: Some("input".to_string()),
    }
}

fn build_local_subtitle_flow() -> PipelineConfig {
    PipelineConfig {
        nodes: vec![
            node("input", "InputNode"),
            node("parse_subtitle", "ParseSubtitleNode"),
            node("validate_subtitle", "ValidateSubtitleNode"),
            node("text_summarize", "TextSummarizeNode"),
        ],
        edges: vec![
            edge("input", "parse_subtitle", None),
            edge("parse_subtitle", "validate_subtitle", None),
            // An invalid local subtitle is a terminal failure: there is no
            // fallback transcription path for a direct subtitle submission,
            // so `text_summarize` simply never runs and the worker's
            // empty-summary check (step 5) fails the job.
            edge("validate_subtitle", "text_summarize", Some("subtitle_valid == True")),
        ],
        entrypoint: Some("input".to_string()),
    }
}

fn build_local_audio_flow() -> PipelineConfig {
    PipelineConfig {
        nodes: vec![
            node("input", "InputNode"),
            node("transcribe", "TranscribeNode"),
            node("detect_silence", "DetectSilenceNode"),
            node("text_summarize", "TextSummarizeNode"),
        ],
        edges: vec![
            edge("input", "transcribe", None),
            edge("transcribe", "detect_silence", None),
            edge("detect_silence", "text_summarize", None),
        ],
        entrypoint: Some("input".to_string()),
    }
}

fn build_local_video_flow() -> PipelineConfig {
    PipelineConfig {
        nodes: vec![
            node("input", "InputNode"),
            node("extract_audio", "ExtractAudioNode"),
            node("transcribe", "TranscribeNode"),
            node("detect_silence", "DetectSilenceNode"),
            node("text_summarize", "TextSummarizeNode"),
        ],
        edges: vec![
            edge("input", "extract_audio", None),
            edge("extract_audio", "transcribe", None),
            edge("transcribe", "detect_silence", None),
            edge("detect_silence", "text_summarize", None),
        ],
        entrypoint: Some("input".to_string()),
    }
}

/// The single place that wires concrete stage names and edge conditions
/// into a [`PipelineConfig`], keyed by the job's `(source_type,
/// local_input_type)`. Stage implementations never know which flow
/// invoked them.
pub fn build_for_job(source_type: &str, local_input_type: Option<&str>) -> Result<PipelineConfig> {
    match source_type {
        "url" => Ok(build_url_flow()),
        "local" => match local_input_type {
            Some("subtitle") => Ok(build_local_subtitle_flow()),
            Some("audio") => Ok(build_local_audio_flow()),
            Some("video") => Ok(build_local_video_flow()),
            other => Err(CoreError::InvalidInput(format!(
                "unsupported local_input_type: {other:?}"
            ))),
        },
        other => Err(CoreError::InvalidInput(format!(
            "unsupported source_type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::PipelineGraph;

    #[test]
    fn url_flow_builds_a_valid_dag() {
        let config = build_for_job("url", None).unwrap();
        let graph = PipelineGraph::build(&config).unwrap();
        assert_eq!(graph.entrypoint, "input");
        assert!(graph.topological_sort().unwrap().contains(&"text_summarize".to_string()));
    }

    #[test]
    fn local_flows_build_valid_dags() {
        for local_input_type in ["subtitle", "audio", "video"] {
            let config = build_for_job("local", Some(local_input_type)).unwrap();
            PipelineGraph::build(&config).unwrap();
        }
    }

    #[test]
    fn unknown_local_input_type_is_rejected() {
        assert!(build_for_job("local", Some("ftp")).is_err());
        assert!(build_for_job("local", None).is_err());
    }

    #[test]
    fn unknown_source_type_is_rejected() {
        assert!(build_for_job("ftp", None).is_err());
    }
}

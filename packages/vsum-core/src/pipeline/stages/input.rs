use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::StageHandler;

/// Validates the inputs a run was constructed with and, for local
/// submissions, derives `local_input_type` from which path was given.
pub struct InputStage {
    node_id: String,
}

impl InputStage {
    pub fn new(node_id: String, _params: HashMap<String, JsonValue>) -> Self {
        Self { node_id }
    }
}

#[async_trait]
impl StageHandler for InputStage {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn output_keys(&self) -> Vec<&'static str> {
        vec!["local_input_type"]
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        match ctx.source_type.as_str() {
            "url" => {
                if ctx.source_url.is_none() {
                    return Err(CoreError::InvalidInput(
                        "source_type 'url' requires source_url".to_string(),
                    ));
                }
            }
            "local" => {
                ctx.local_input_type = Some(
                    if ctx.video_path.is_some() {
                        "video"
                    } else if ctx.audio_path.is_some() {
                        "audio"
                    } else if ctx.subtitle_path.is_some() {
                        "subtitle"
                    } else {
                        return Err(CoreError::InvalidInput(
                            "source_type 'local' requires a video, audio or subtitle path"
                                .to_string(),
                        ));
                    }
                    .to_string(),
                );
            }
            other => {
                return Err(CoreError::InvalidInput(format!(
                    "invalid source_type: {other}"
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx(source_type: &str) -> PipelineContext {
        PipelineContext::new("r1".to_string(), source_type, PathBuf::from("/tmp/b"))
    }

    #[tokio::test]
    async fn url_without_source_url_is_rejected() {
        let stage = InputStage::new("input".to_string(), HashMap::new());
        let mut c = ctx("url");
        assert!(stage.run(&mut c).await.is_err());
    }

    #[tokio::test]
    async fn url_with_source_url_passes() {
        let stage = InputStage::new("input".to_string(), HashMap::new());
        let mut c = ctx("url");
        c.source_url = Some("https://example.com/v".to_string());
        assert!(stage.run(&mut c).await.is_ok());
    }

    #[tokio::test]
    async fn local_without_any_path_is_rejected() {
        let stage = InputStage::new("input".to_string(), HashMap::new());
        let mut c = ctx("local");
        assert!(stage.run(&mut c).await.is_err());
    }

    #[tokio::test]
    async fn local_with_video_path_sets_local_input_type() {
        let stage = InputStage::new("input".to_string(), HashMap::new());
        let mut c = ctx("local");
        c.video_path = Some(PathBuf::from("/tmp/v.mp4"));
        stage.run(&mut c).await.unwrap();
        assert_eq!(c.local_input_type.as_deref(), Some("video"));
    }

    #[tokio::test]
    async fn unknown_source_type_is_rejected() {
        let stage = InputStage::new("input".to_string(), HashMap::new());
        let mut c = ctx("ftp");
        assert!(stage.run(&mut c).await.is_err());
    }
}

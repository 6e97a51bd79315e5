use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::context::PipelineContext;

/// A single pipeline node. Implementations read their inputs from
/// `ctx` and write their outputs back into `ctx`; nodes never talk to
/// each other directly.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn node_id(&self) -> &str;

    /// Field names this stage writes into the context when it runs.
    /// Used only for trace reporting, not for validation.
    fn output_keys(&self) -> Vec<&'static str>;

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()>;
}

pub mod condition;
pub mod context;
pub mod graph;
pub mod limits;
pub mod registry;
pub mod runner;
pub mod stage;
pub mod stages;

pub use context::{PipelineContext, Thresholds, TraceEvent, TraceStatus};
pub use graph::{PipelineConfig, PipelineEdgeConfig, PipelineGraph, PipelineNodeConfig};
pub use limits::PipelineLimits;
pub use registry::{default_registry, StageRegistry};
pub use runner::PipelineRunner;
pub use stage::StageHandler;

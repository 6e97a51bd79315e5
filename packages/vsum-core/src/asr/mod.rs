pub mod chunk_merger;
pub mod data;
pub mod engine;

pub use chunk_merger::ChunkMerger;
pub use data::{estimate_token_count, AsrData, AsrDataSeg};
pub use engine::{AsrEngine, NullAsrEngine};

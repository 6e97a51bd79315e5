pub mod queue;
pub mod task_factory;
pub mod worker;

pub use queue::{Job, JobQueue};
pub use worker::JobWorker;

use std::time::Duration;

use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::{CoreError, Result};

/// Process-wide category semaphores shared by every stage instance of
/// a given kind. Heavy stages acquire a permit before doing real work
/// and release it on drop; acquisition itself is bounded by a timeout
/// so a saturated category surfaces as a specific error instead of
/// hanging a worker forever.
pub struct PipelineLimits {
    pub transcode: Semaphore,
    pub transcribe: Semaphore,
    pub stage_wait: Duration,
}

impl PipelineLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transcode: Semaphore::new(config.transcode_concurrency),
            transcribe: Semaphore::new(config.transcribe_concurrency),
            stage_wait: config.pipeline_stage_wait,
        }
    }

    pub async fn acquire_transcode(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.acquire(&self.transcode, "transcode").await
    }

    pub async fn acquire_transcribe(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.acquire(&self.transcribe, "transcribe").await
    }

    async fn acquire<'a>(
        &self,
        sem: &'a Semaphore,
        category: &str,
    ) -> Result<tokio::sync::SemaphorePermit<'a>> {
        match tokio::time::timeout(self.stage_wait, sem.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CoreError::PipelineStageUnavailable(format!(
                "{category} semaphore closed"
            ))),
            Err(_) => Err(CoreError::PipelineStageUnavailable(format!(
                "{category} semaphore acquisition timed out"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_when_capacity_available() {
        let limits = PipelineLimits {
            transcode: Semaphore::new(1),
            transcribe: Semaphore::new(1),
            stage_wait: Duration::from_millis(50),
        };
        assert!(limits.acquire_transcode().await.is_ok());
    }

    #[tokio::test]
    async fn acquisition_times_out_when_saturated() {
        let limits = PipelineLimits {
            transcode: Semaphore::new(1),
            transcribe: Semaphore::new(1),
            stage_wait: Duration::from_millis(20),
        };
        let _held = limits.transcode.acquire().await.unwrap();
        let err = limits.acquire_transcode().await.unwrap_err();
        assert!(matches!(err, CoreError::PipelineStageUnavailable(_)));
    }
}

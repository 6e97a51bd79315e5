use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

/// One unit of work dispatched to a worker. `file_id` resolves the
/// uploaded bytes for a local submission through the upload store;
/// `file_hash`/`source_url` are carried through for cache-key recomputation
/// and logging, matching the fields the cache entry itself was keyed on.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub cache_key: String,
    pub source_type: String,
    pub source_url: Option<String>,
    pub file_id: Option<String>,
    pub file_hash: Option<String>,
    pub request_id: Option<String>,
}

/// FIFO in-memory queue backed by an unbounded `mpsc` channel (the queue
/// itself is never the throttle; the worker pool size and the pipeline's
/// own category semaphores are). `start()` is idempotent: calling it
/// again while workers are already running is a no-op. `stop()` flips a
/// flag workers observe on their next dequeue poll rather than aborting
/// an in-flight run.
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
    receiver: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    stopped: Arc<AtomicBool>,
    started: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(Some(receiver)),
            stopped: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
        }
    }

    pub fn enqueue(&self, job: Job) {
        // The receiver is only ever dropped by worker shutdown; a send
        // error here means no worker will ever run this job, which is a
        // process-lifecycle condition the caller can't act on anyway.
        let _ = self.sender.send(job);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Non-blocking cancel flag; in-flight stage execution is not
    /// interrupted, workers simply stop pulling new jobs.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Marks the queue as accepting work again. Idempotent alongside
    /// `stop()`: calling `start` twice without an intervening `stop` is a
    /// no-op since `stopped` is already `false`.
    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Pulls the next job with a short timeout, returning `None` on
    /// timeout or when the queue has been stopped. The timeout exists
    /// purely so a worker loop stays responsive to `stop()` instead of
    /// blocking forever on an empty channel.
    pub async fn recv(&self) -> Option<Job> {
        if self.is_stopped() {
            return None;
        }
        let mut guard = self.receiver.lock().await;
        let Some(receiver) = guard.as_mut() else { return None };
        match tokio::time::timeout(Duration::from_millis(200), receiver.recv()).await {
            Ok(Some(job)) => Some(job),
            Ok(None) => None,
            Err(_) => None,
        }
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> Job {
        Job {
            job_id: id.to_string(),
            cache_key: "k1".to_string(),
            source_type: "url".to_string(),
            source_url: Some("https://example.com/v".to_string()),
            file_id: None,
            file_hash: None,
            request_id: None,
        }
    }

    #[tokio::test]
    async fn recv_returns_enqueued_jobs_in_order() {
        let queue = JobQueue::new();
        queue.start();
        queue.enqueue(job("j1"));
        queue.enqueue(job("j2"));
        assert_eq!(queue.recv().await.unwrap().job_id, "j1");
        assert_eq!(queue.recv().await.unwrap().job_id, "j2");
    }

    #[tokio::test]
    async fn recv_times_out_on_an_empty_queue() {
        let queue = JobQueue::new();
        queue.start();
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn stop_prevents_further_receives() {
        let queue = JobQueue::new();
        queue.start();
        queue.enqueue(job("j1"));
        queue.stop();
        assert!(queue.recv().await.is_none());
    }

    #[test]
    fn start_is_idempotent() {
        let queue = JobQueue::new();
        queue.start();
        queue.start();
        assert!(queue.has_started());
        assert!(!queue.is_stopped());
    }
}

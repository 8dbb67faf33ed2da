//! Serial job execution.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::coordinator::Coordinator;
use crate::error::JobError;
use crate::jobs::{Job, JobQueue, JobStatus, StatusCache};

/// Takes jobs off the queue one at a time and runs each with exclusive access
/// to the workspace. Every finished job requests a sync.
pub struct JobDispatcher {
    queue: JobQueue,
    cache: Arc<StatusCache>,
    coordinator: Coordinator,
    timeout: Duration,
    sync_trigger: broadcast::Sender<()>,
}

impl JobDispatcher {
    pub fn new(
        queue: JobQueue,
        cache: Arc<StatusCache>,
        coordinator: Coordinator,
        timeout: Duration,
        sync_trigger: broadcast::Sender<()>,
    ) -> Self {
        Self {
            queue,
            cache,
            coordinator,
            timeout,
            sync_trigger,
        }
    }

    /// Runs until the queue is closed.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job) = self.queue.ready().await {
                self.run(job).await;
            }
            tracing::debug!("job dispatcher stopped");
        })
    }

    pub async fn run(&self, job: Job) {
        let Job {
            id,
            description,
            action,
        } = job;
        // Stays queued until the workspace is ours
        let guard = self.coordinator.exclusive().await;
        self.cache.set_status(id, JobStatus::Running);
        tracing::info!(job_id = %id, job = %description, "running job");

        let status = match tokio::time::timeout(self.timeout, action(guard)).await {
            Ok(Ok(result)) => JobStatus::Succeeded(result),
            Ok(Err(e)) => {
                tracing::error!(job_id = %id, job = %description, error = %e, "job failed");
                JobStatus::Failed(e)
            }
            Err(_) => {
                let err = JobError::Timeout(description.clone(), self.timeout.as_secs());
                tracing::error!(job_id = %id, error = %err, "job timed out");
                JobStatus::Failed(err.to_string())
            }
        };

        tracing::info!(job_id = %id, status = %status, "job finished");
        self.cache.set_status(id, status);
        // No subscriber only means the scheduler is not running
        let _ = self.sync_trigger.send(());
    }
}

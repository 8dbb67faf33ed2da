//! Unbounded FIFO of pending jobs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::job::Job;
use crate::error::JobError;

struct Inner {
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Cloneable handle to a shared job queue.
///
/// Enqueueing never waits for execution; one consumer takes jobs with
/// [`ready`](Self::ready).
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.inner.jobs.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("job queue lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn enqueue(&self, job: Job) -> Result<(), JobError> {
        if self.is_closed() {
            return Err(JobError::QueueClosed);
        }
        self.jobs().push_back(job);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Waits for the oldest job. Returns `None` once the queue is closed.
    pub async fn ready(&self) -> Option<Job> {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_closed() {
                return None;
            }
            if let Some(job) = self.jobs().pop_front() {
                return Some(job);
            }
            notified.await;
        }
    }

    /// Visits queued jobs oldest first until `f` returns `false`.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Job) -> bool,
    {
        for job in self.jobs().iter() {
            if !f(job) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Rejects further jobs and wakes every waiter.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

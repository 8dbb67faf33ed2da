//! The long-running agent: a sync scheduler and a job dispatcher sharing one
//! coordinator.

pub mod coordinator;
pub mod cycle;
pub mod dispatcher;
pub mod scheduler;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub use coordinator::{Coordinator, WorkGuard, Workspace};
pub use cycle::{CycleError, CycleOutcome, MarkerOutcome, SyncCycle};
pub use dispatcher::JobDispatcher;
pub use scheduler::SyncScheduler;

use crate::cluster::{AnnotationStore, Cluster, Kubectl, ObjectRef};
use crate::config::{JobSettings, Settings, SyncStateSettings};
use crate::error::{JobError, Result};
use crate::events::EventSink;
use crate::git::{GitRepository, GitSource};
use crate::jobs::{Job, JobId, JobQueue, JobStatus, StatusCache};
use crate::state::{AnnotationState, GitTagState, SyncStateProvider};

pub struct Daemon {
    coordinator: Coordinator,
    cycle: Arc<SyncCycle>,
    queue: JobQueue,
    cache: Arc<StatusCache>,
    trigger: broadcast::Sender<()>,
    interval: Duration,
    job_timeout: Duration,
    scheduler: Option<SyncScheduler>,
    handles: Vec<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(workspace: Workspace, cycle: SyncCycle, interval: Duration, jobs: &JobSettings) -> Self {
        let (trigger, _) = broadcast::channel(16);
        Self {
            coordinator: Coordinator::new(workspace),
            cycle: Arc::new(cycle),
            queue: JobQueue::new(),
            cache: Arc::new(StatusCache::new(jobs.status_cache_size)),
            trigger,
            interval,
            job_timeout: jobs.timeout(),
            scheduler: None,
            handles: Vec::new(),
        }
    }

    /// Wires the git mirror, kubectl and the configured marker backend.
    pub fn from_settings(settings: &Settings, sink: Arc<dyn EventSink>) -> Result<Self> {
        settings.prepare_work_dir()?;

        let repo = Arc::new(GitRepository::new(&settings.work_dir, settings.git.clone()));
        let kubectl = Arc::new(Kubectl::new(settings.cluster.clone(), settings.sync.timeout()));

        let state: Arc<dyn SyncStateProvider> = match &settings.sync.state {
            SyncStateSettings::GitTag => Arc::new(GitTagState::new(
                Arc::clone(&repo),
                settings.git.sync_tag.clone(),
            )),
            SyncStateSettings::Annotation {
                namespace,
                kind,
                name,
            } => {
                let store: Arc<dyn AnnotationStore> = kubectl.clone();
                Arc::new(AnnotationState::new(
                    store,
                    ObjectRef::new(namespace.clone(), kind.clone(), name.clone()),
                ))
            }
        };
        tracing::info!(marker = %state.describe(), url = %settings.git.url, branch = %settings.git.branch, "configured sync");

        let git: Arc<dyn GitSource> = repo;
        let cluster: Arc<dyn Cluster> = kubectl;
        let cycle = SyncCycle::new(settings.git.paths.clone(), sink)
            .with_timeouts(settings.git.timeout(), settings.sync.timeout());

        Ok(Self::new(
            Workspace::new(git, cluster, state),
            cycle,
            settings.sync.interval(),
            &settings.jobs,
        ))
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Spawns the scheduler and the dispatcher.
    pub fn start(&mut self) {
        if self.scheduler.is_some() {
            return;
        }
        let scheduler = SyncScheduler::new(
            self.coordinator.clone(),
            Arc::clone(&self.cycle),
            self.interval,
        );
        self.handles.push(scheduler.start(self.trigger.subscribe()));
        self.scheduler = Some(scheduler);

        let dispatcher = JobDispatcher::new(
            self.queue.clone(),
            Arc::clone(&self.cache),
            self.coordinator.clone(),
            self.job_timeout,
            self.trigger.clone(),
        );
        self.handles.push(dispatcher.start());
        tracing::info!(interval_secs = self.interval.as_secs(), "daemon started");
    }

    /// Asks the scheduler for a cycle as soon as possible.
    pub fn request_sync(&self) {
        let _ = self.trigger.send(());
    }

    /// Queues a job to run with exclusive access to git and the cluster.
    pub fn queue_job<F, Fut>(&self, description: impl Into<String>, action: F) -> std::result::Result<JobId, JobError>
    where
        F: FnOnce(WorkGuard) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, String>> + Send + 'static,
    {
        let job = Job::from_fn(description, action);
        let id = job.id;
        self.cache.set_status(id, JobStatus::Queued);
        if let Err(e) = self.queue.enqueue(job) {
            self.cache.set_status(id, JobStatus::Failed(e.to_string()));
            return Err(e);
        }
        Ok(id)
    }

    /// Current status of a job. `None` means unknown, not failed.
    pub fn job_status(&self, id: &JobId) -> Option<JobStatus> {
        let mut queued = false;
        self.queue.for_each(|job| {
            queued = job.id == *id;
            !queued
        });
        if queued {
            return Some(JobStatus::Queued);
        }
        self.cache.status(id)
    }

    /// Runs one cycle right away, waiting for any job or cycle in progress.
    pub async fn sync_once(&self) -> std::result::Result<CycleOutcome, CycleError> {
        let mut workspace = self.coordinator.exclusive().await;
        self.cycle.run(&mut workspace).await
    }

    /// Stops accepting jobs and waits for the running cycle or job to finish.
    pub async fn shutdown(&mut self) {
        self.queue.close();
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        self.request_sync();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        tracing::info!("daemon stopped");
    }
}

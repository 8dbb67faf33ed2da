//! Exclusive access to the collaborators that touch git and the cluster.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cluster::Cluster;
use crate::git::GitSource;
use crate::state::SyncStateProvider;
use crate::sync::OrderedApplyEngine;

/// Everything a cycle or a job mutates.
pub struct Workspace {
    pub git: Arc<dyn GitSource>,
    pub cluster: Arc<dyn Cluster>,
    pub state: Arc<dyn SyncStateProvider>,
    /// Carries failed resources from one cycle to the next.
    pub engine: OrderedApplyEngine,
}

impl Workspace {
    pub fn new(
        git: Arc<dyn GitSource>,
        cluster: Arc<dyn Cluster>,
        state: Arc<dyn SyncStateProvider>,
    ) -> Self {
        Self {
            git,
            cluster,
            state,
            engine: OrderedApplyEngine::new(),
        }
    }
}

/// Held for the duration of a cycle or a job.
pub type WorkGuard = OwnedMutexGuard<Workspace>;

/// Serializes cycles and jobs.
#[derive(Clone)]
pub struct Coordinator {
    workspace: Arc<Mutex<Workspace>>,
}

impl Coordinator {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace: Arc::new(Mutex::new(workspace)),
        }
    }

    /// Waits until no cycle or job is running.
    pub async fn exclusive(&self) -> WorkGuard {
        Arc::clone(&self.workspace).lock_owned().await
    }

    /// `None` while a cycle or job holds the workspace.
    pub fn try_exclusive(&self) -> Option<WorkGuard> {
        Arc::clone(&self.workspace).try_lock_owned().ok()
    }
}

//! Bounded lookaside cache of job statuses.

use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::job::{JobId, JobStatus};

#[derive(Default)]
struct Entries {
    /// Insertion order, oldest first.
    order: VecDeque<JobId>,
    statuses: HashMap<JobId, JobStatus>,
}

/// Keeps the statuses of the most recently recorded jobs.
///
/// When full, the entry recorded first is evicted. Updating an existing job
/// keeps its place in line.
pub struct StatusCache {
    size: usize,
    entries: RwLock<Entries>,
}

impl StatusCache {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!("status cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!("status cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn set_status(&self, id: JobId, status: JobStatus) {
        if self.size == 0 {
            return;
        }
        let mut entries = self.write();
        if let Some(existing) = entries.statuses.get_mut(&id) {
            *existing = status;
            return;
        }
        while entries.order.len() >= self.size {
            match entries.order.pop_front() {
                Some(evicted) => {
                    entries.statuses.remove(&evicted);
                }
                None => break,
            }
        }
        entries.order.push_back(id);
        entries.statuses.insert(id, status);
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.read().statuses.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    pub fn reset(&self) {
        let mut entries = self.write();
        entries.order.clear();
        entries.statuses.clear();
    }
}

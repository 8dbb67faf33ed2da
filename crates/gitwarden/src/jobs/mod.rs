//! Serial job execution support: the pending queue and recent job statuses.

pub mod job;
pub mod queue;
pub mod status_cache;

pub use job::{Job, JobAction, JobId, JobStatus};
pub use queue::JobQueue;
pub use status_cache::StatusCache;

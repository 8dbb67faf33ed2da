pub mod cluster;
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod git;
pub mod jobs;
pub mod manifest;
pub mod notes;
pub mod resource;
pub mod state;
pub mod sync;

pub use cluster::{AnnotationStore, Cluster, ClusterError, Kubectl, Transport, TransportError, Verb};
pub use config::Settings;
pub use daemon::{Coordinator, CycleError, CycleOutcome, Daemon, MarkerOutcome, SyncCycle, WorkGuard, Workspace};
pub use error::{ConfigError, JobError, Result, WardenError};
pub use events::{BroadcastEventSink, Event, EventSink, EventType, LogEventSink};
pub use git::{Checkout, Commit, CommitRange, GitError, GitRepository, GitSource};
pub use jobs::{Job, JobId, JobQueue, JobStatus, StatusCache};
pub use resource::{Resource, ResourceId, ResourceSet};
pub use state::{AnnotationState, GitTagState, MarkerUpdate, StateError, SyncStateProvider};
pub use sync::{ChangeSet, OrderedApplyEngine, ResourceError, SyncAction, SyncError, SyncReport};

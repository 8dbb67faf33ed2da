//! Planning and applying the difference between declared and observed state.

pub mod engine;
pub mod error;
pub mod order;
pub mod planner;

pub use engine::{ActionRecord, BatchPlan, BatchStrategy, ExecutionMode, OrderedApplyEngine, SyncReport};
pub use error::{ResourceError, SyncError};
pub use order::{apply_order, delete_order};
pub use planner::{plan, ChangeSet, SyncAction};

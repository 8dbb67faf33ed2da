//! Jobs: an identified, boxed action run with exclusive access to the workspace.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::daemon::WorkGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Work run while holding exclusive access to git and the cluster.
pub type JobAction =
    Box<dyn FnOnce(WorkGuard) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send>;

pub struct Job {
    pub id: JobId,
    pub description: String,
    pub action: JobAction,
}

impl Job {
    pub fn new(description: impl Into<String>, action: JobAction) -> Self {
        Self {
            id: JobId::new(),
            description: description.into(),
            action,
        }
    }

    /// Boxes an async closure into a job.
    pub fn from_fn<F, Fut>(description: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(WorkGuard) -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        Self::new(description, Box::new(move |guard| f(guard).boxed()))
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded(serde_json::Value),
    Failed(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded(_) | JobStatus::Failed(_))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded(_) => write!(f, "succeeded"),
            JobStatus::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_round_trip() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(JobStatus::Queued).unwrap(),
            serde_json::json!({"status": "queued"})
        );
        assert_eq!(
            serde_json::to_value(JobStatus::Failed("boom".to_string())).unwrap(),
            serde_json::json!({"status": "failed", "detail": "boom"})
        );
        assert!(JobStatus::Succeeded(serde_json::Value::Null).is_finished());
        assert!(!JobStatus::Running.is_finished());
    }
}

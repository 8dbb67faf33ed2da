use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::daemon::CycleError;
use crate::git::GitError;
use crate::manifest::ManifestError;
use crate::state::StateError;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Sync state error: {0}")]
    State(#[from] StateError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Sync cycle failed: {0}")]
    Cycle(#[from] CycleError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to create work directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Job '{0}' timed out after {1}s")]
    Timeout(String, u64),
}

pub type Result<T> = std::result::Result<T, WardenError>;

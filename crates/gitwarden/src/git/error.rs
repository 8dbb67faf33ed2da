//! Git error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while talking to git.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git operation failed: {0}")]
    Operation(String),

    #[error("Git network error: {0}")]
    Network(String),

    #[error("Git operation timed out after {0}s")]
    Timeout(u64),

    #[error("Git authentication failed: {0}")]
    AuthFailed(String),

    #[error("Git mirror not initialized at '{0}'")]
    NotInitialized(PathBuf),

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("Failed to prepare working directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GitError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GitError::Network(_) | GitError::Timeout(_))
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitError::Network(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
    {
        return GitError::AuthFailed(stderr.trim().to_string());
    }

    if lower.contains("unknown revision") || lower.contains("bad revision") {
        return GitError::UnknownRevision(stderr.trim().to_string());
    }

    GitError::Operation(stderr.trim().to_string())
}

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network() {
        let err = classify_git_error("fatal: unable to access 'https://example.com/': Could not resolve host: example.com");
        assert!(matches!(err, GitError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_auth() {
        let err = classify_git_error("git@example.com: Permission denied (publickey).");
        assert!(matches!(err, GitError::AuthFailed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_unknown_revision() {
        let err = classify_git_error("fatal: bad revision 'deadbeef..cafe'");
        assert!(matches!(err, GitError::UnknownRevision(_)));
    }

    #[test]
    fn test_classify_fallback() {
        let err = classify_git_error("  fatal: something else  ");
        match err {
            GitError::Operation(msg) => assert_eq!(msg, "fatal: something else"),
            other => panic!("unexpected {:?}", other),
        }
    }
}

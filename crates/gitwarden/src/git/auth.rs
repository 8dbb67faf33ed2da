//! Git authentication handling.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use super::error::{GitError, Result};
use crate::config::{GitAuthSettings, GitAuthType};

/// Escapes a token for safe use in single-quoted shell strings.
/// Replaces single quotes with '\'' (end quote, escaped quote, start quote).
pub fn shell_escape_token(token: &str) -> String {
    token.replace('\'', "'\\''")
}

/// RAII guard for askpass script cleanup.
///
/// Deletes the askpass script when dropped so tokens are not left on disk
/// even if the git command fails.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(error = %e, "failed to clean up askpass script");
            }
        }
    }
}

/// Authentication environment for git commands.
#[derive(Debug)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command to keep the askpass script alive.
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn none() -> Self {
        Self {
            env_vars: Vec::new(),
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

/// Reads the token from the configured file, falling back to the env var.
fn resolve_token(auth: &GitAuthSettings) -> Result<SecretString> {
    if let Some(path) = &auth.token_file {
        let token = std::fs::read_to_string(path).map_err(|e| {
            GitError::AuthFailed(format!(
                "Failed to read token file '{}': {}",
                path.display(),
                e
            ))
        })?;
        return Ok(SecretString::from(token.trim().to_string()));
    }

    if !auth.token_env_var.is_empty() {
        return std::env::var(&auth.token_env_var)
            .map(|t| SecretString::from(t.trim().to_string()))
            .map_err(|_| {
                GitError::AuthFailed(format!(
                    "Environment variable '{}' is not set",
                    auth.token_env_var
                ))
            });
    }

    Err(GitError::AuthFailed(
        "Token auth requires tokenFile or tokenEnvVar".to_string(),
    ))
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_default()
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

/// Build the auth environment for git commands that talk to the upstream.
pub fn build_auth_env(auth: &GitAuthSettings) -> Result<AuthEnv> {
    match auth.auth_type {
        GitAuthType::None => Ok(AuthEnv::none()),
        GitAuthType::Token => {
            let token = resolve_token(auth)?;
            let escaped = shell_escape_token(token.expose_secret());
            let path =
                std::env::temp_dir().join(format!(".git-askpass-{}.sh", uuid::Uuid::new_v4()));
            write_askpass(&path, &format!("#!/bin/sh\necho '{}'\n", escaped))?;
            let cleanup = AskpassCleanup::new(path.clone());

            let path_str = path
                .to_str()
                .ok_or_else(|| {
                    GitError::AuthFailed(
                        "Temp directory path contains non-UTF8 characters".to_string(),
                    )
                })?
                .to_string();

            Ok(AuthEnv {
                env_vars: vec![
                    ("GIT_ASKPASS".to_string(), path_str),
                    ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
                ],
                _cleanup: cleanup,
            })
        }
        GitAuthType::SshKey => {
            let key_path = if auth.ssh_key_path.is_empty() {
                expand_home("~/.ssh/id_ed25519")
            } else {
                expand_home(&auth.ssh_key_path)
            };

            if !key_path.exists() {
                return Err(GitError::AuthFailed(format!(
                    "SSH key file not found: {}",
                    key_path.display()
                )));
            }

            let escaped = key_path.display().to_string().replace('\'', "'\\''");
            Ok(AuthEnv {
                env_vars: vec![(
                    "GIT_SSH_COMMAND".to_string(),
                    format!(
                        "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                        escaped
                    ),
                )],
                _cleanup: AskpassCleanup::empty(),
            })
        }
    }
}

#[cfg(unix)]
fn write_askpass(path: &Path, script: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o700)
        .open(path)
        .map_err(|e| GitError::WorkDir {
            path: path.to_path_buf(),
            source: e,
        })?;
    file.write_all(script.as_bytes())
        .map_err(|e| GitError::WorkDir {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(not(unix))]
fn write_askpass(path: &Path, script: &str) -> Result<()> {
    std::fs::write(path, script).map_err(|e| GitError::WorkDir {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_auth_env_none() {
        let auth = build_auth_env(&GitAuthSettings::default()).unwrap();
        assert!(auth.env_vars.is_empty());
    }

    #[test]
    fn test_auth_env_ssh_key_not_found() {
        let settings = GitAuthSettings {
            auth_type: GitAuthType::SshKey,
            ssh_key_path: "/nonexistent/path/id_rsa".to_string(),
            ..Default::default()
        };
        let err = build_auth_env(&settings).unwrap_err().to_string();
        assert!(err.contains("SSH key file not found"));
    }

    #[test]
    fn test_auth_env_ssh_key() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "key").unwrap();
        let settings = GitAuthSettings {
            auth_type: GitAuthType::SshKey,
            ssh_key_path: key.display().to_string(),
            ..Default::default()
        };
        let auth = build_auth_env(&settings).unwrap();
        assert_eq!(auth.env_vars[0].0, "GIT_SSH_COMMAND");
        assert!(auth.env_vars[0].1.contains("IdentitiesOnly=yes"));
    }

    #[test]
    fn test_token_file_askpass_is_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let token_file = dir.path().join("token");
        std::fs::write(&token_file, "s3cr3t\n").unwrap();
        let settings = GitAuthSettings {
            auth_type: GitAuthType::Token,
            token_file: Some(token_file),
            ..Default::default()
        };

        let auth = build_auth_env(&settings).unwrap();
        let script = PathBuf::from(&auth.env_vars[0].1);
        let content = std::fs::read_to_string(&script).unwrap();
        assert!(content.contains("echo 's3cr3t'"));

        drop(auth);
        assert!(!script.exists());
    }

    #[test]
    fn test_token_without_source_fails() {
        let settings = GitAuthSettings {
            auth_type: GitAuthType::Token,
            ..Default::default()
        };
        assert!(matches!(
            build_auth_env(&settings),
            Err(GitError::AuthFailed(_))
        ));
    }

    #[test]
    fn test_shell_escape_token() {
        assert_eq!(shell_escape_token("simple"), "simple");
        assert_eq!(shell_escape_token("it's"), "it'\\''s");
    }
}

//! Git repository operations over a local mirror.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use super::auth::{build_auth_env, AuthEnv};
use super::error::{classify_git_error, GitError, Result};
use super::parse::{
    format_git_error, parse_commit_log, parse_name_list, parse_note_list, parse_remote_tag,
    LOG_FORMAT,
};
use super::types::*;
use super::GitSource;
use crate::config::GitSettings;

/// Git repository handle: a bare mirror of the upstream under the work
/// directory, from which throwaway checkouts are cloned.
pub struct GitRepository {
    mirror_dir: PathBuf,
    checkouts_dir: PathBuf,
    settings: GitSettings,
}

impl GitRepository {
    /// Creates a repository handle rooted at `work_dir`. Nothing touches disk
    /// until the first [`refresh`](GitSource::refresh).
    pub fn new(work_dir: impl AsRef<Path>, settings: GitSettings) -> Self {
        let work_dir = work_dir.as_ref();
        Self {
            mirror_dir: work_dir.join("mirror.git"),
            checkouts_dir: work_dir.join("checkouts"),
            settings,
        }
    }

    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    pub fn settings(&self) -> &GitSettings {
        &self.settings
    }

    /// Whether the mirror has been cloned.
    pub fn is_initialized(&self) -> bool {
        self.mirror_dir.join("HEAD").exists()
    }

    fn notes_ref(&self) -> String {
        if self.settings.notes_ref.starts_with("refs/") {
            self.settings.notes_ref.clone()
        } else {
            format!("refs/notes/{}", self.settings.notes_ref)
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(GitError::NotInitialized(self.mirror_dir.clone()))
        }
    }

    async fn clone_mirror(&self) -> Result<()> {
        let parent = self
            .mirror_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| GitError::WorkDir {
                path: parent.clone(),
                source: e,
            })?;

        let mirror = self.mirror_dir.to_string_lossy().into_owned();
        tracing::info!(url = %self.settings.url, "cloning mirror");
        let output = self
            .run_remote(&parent, &["clone", "--mirror", "--quiet", &self.settings.url, &mirror])
            .await?;
        check(&output)
    }

    /// Commit the tag currently points at in the mirror.
    pub async fn tag_revision(&self, tag: &str) -> Result<Option<String>> {
        self.ensure_initialized()?;
        let spec = format!("refs/tags/{}^{{commit}}", tag);
        let output = self
            .run_git(&self.mirror_dir, &["rev-parse", "--verify", "--quiet", &spec])
            .await?;
        if output.status.success() {
            Ok(Some(stdout_trimmed(&output)))
        } else {
            Ok(None)
        }
    }

    /// Position of a tag in the upstream, bypassing the mirror.
    pub async fn remote_tag(&self, tag: &str) -> Result<Option<RemoteTag>> {
        let refname = format!("refs/tags/{}", tag);
        let peeled = format!("{}^{{}}", refname);
        let cwd = self.work_root();
        let output = self
            .run_remote(&cwd, &["ls-remote", &self.settings.url, &refname, &peeled])
            .await?;
        check(&output)?;
        Ok(parse_remote_tag(
            &String::from_utf8_lossy(&output.stdout),
            tag,
        ))
    }

    /// Points an annotated tag at `revision` in the upstream.
    ///
    /// The push happens from a fresh clone and is guarded by a lease on
    /// `expected_object`: the upstream ref must still hold that object, or
    /// must not exist when it is `None`.
    pub async fn push_tag(
        &self,
        tag: &str,
        revision: &str,
        message: &str,
        expected_object: Option<&str>,
    ) -> Result<TagPush> {
        let checkout = self.checkout(revision).await?;
        let dir = checkout.dir().to_path_buf();
        let user_name = format!("user.name={}", self.settings.user_name);
        let user_email = format!("user.email={}", self.settings.user_email);

        let output = self
            .run_git(
                &dir,
                &[
                    "-c", &user_name, "-c", &user_email, "tag", "--force", "--annotate", tag,
                    "--message", message, revision,
                ],
            )
            .await?;
        check(&output)?;

        let refname = format!("refs/tags/{}", tag);
        let lease = format!(
            "--force-with-lease={}:{}",
            refname,
            expected_object.unwrap_or("")
        );
        let refspec = format!("{}:{}", refname, refname);
        let output = self
            .run_remote(&dir, &["push", &lease, "origin", &refspec])
            .await?;

        if output.status.success() {
            return Ok(TagPush::Pushed);
        }
        let text = format_git_error(&output);
        if text.contains("stale info") || text.contains("[rejected]") {
            return Ok(TagPush::Rejected);
        }
        Err(classify_git_error(&text))
    }

    /// Removes a tag from the upstream. Deleting an absent tag succeeds.
    pub async fn delete_remote_tag(&self, tag: &str) -> Result<()> {
        let refspec = format!(":refs/tags/{}", tag);
        let cwd = self.work_root();
        let output = self
            .run_remote(&cwd, &["push", &self.settings.url, &refspec])
            .await?;
        check(&output)
    }

    fn work_root(&self) -> PathBuf {
        self.mirror_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn pathspec<'a>(&self, args: &mut Vec<&'a str>, paths: &'a [String]) {
        args.push("--");
        args.extend(
            paths
                .iter()
                .map(|p| p.trim_matches('/'))
                .filter(|p| !p.is_empty() && *p != "."),
        );
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    /// Runs a git command that stays local.
    async fn run_git(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        self.exec(dir, args, None).await
    }

    /// Runs a git command that talks to the upstream, with credentials.
    async fn run_remote(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        let auth = self.get_auth_env()?;
        let output = self.exec(dir, args, Some(&auth)).await;
        // Drop auth env (cleanup guard) after command completes
        drop(auth);
        output
    }

    async fn exec(&self, dir: &Path, args: &[&str], auth: Option<&AuthEnv>) -> Result<Output> {
        let mut cmd = Command::new("git");
        cmd.current_dir(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(auth) = auth {
            for (key, value) in &auth.env_vars {
                cmd.env(key, value);
            }
        }

        let timeout = self.settings.timeout();
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| GitError::Operation(e.to_string())),
            Err(_) => {
                tracing::warn!(command = ?args.first(), "git command timed out");
                Err(GitError::Timeout(timeout.as_secs()))
            }
        }
    }

    /// Gets authentication environment for git commands.
    fn get_auth_env(&self) -> Result<AuthEnv> {
        build_auth_env(&self.settings.auth)
    }
}

fn check(output: &Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(classify_git_error(&format_git_error(output)))
    }
}

fn stdout_trimmed(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[async_trait]
impl GitSource for GitRepository {
    async fn refresh(&self) -> Result<()> {
        if !self.is_initialized() {
            return self.clone_mirror().await;
        }
        let output = self
            .run_remote(
                &self.mirror_dir,
                &["fetch", "--prune", "--force", "--quiet", "origin"],
            )
            .await?;
        check(&output)
    }

    async fn head_revision(&self) -> Result<String> {
        self.ensure_initialized()?;
        let spec = format!("refs/heads/{}^{{commit}}", self.settings.branch);
        let output = self
            .run_git(&self.mirror_dir, &["rev-parse", "--verify", "--quiet", &spec])
            .await?;
        if output.status.success() {
            Ok(stdout_trimmed(&output))
        } else {
            Err(GitError::UnknownRevision(format!(
                "branch '{}'",
                self.settings.branch
            )))
        }
    }

    async fn checkout(&self, revision: &str) -> Result<Checkout> {
        self.ensure_initialized()?;
        tokio::fs::create_dir_all(&self.checkouts_dir)
            .await
            .map_err(|e| GitError::WorkDir {
                path: self.checkouts_dir.clone(),
                source: e,
            })?;

        let dir = self.checkouts_dir.join(uuid::Uuid::new_v4().to_string());
        let mirror = self.mirror_dir.to_string_lossy().into_owned();
        let target = dir.to_string_lossy().into_owned();
        let output = self
            .run_git(
                &self.checkouts_dir,
                &["clone", "--quiet", "--no-checkout", &mirror, &target],
            )
            .await?;
        check(&output)?;

        let checkout = Checkout::owned(dir.clone(), revision);
        let output = self
            .run_git(&dir, &["checkout", "--quiet", "--detach", revision])
            .await?;
        check(&output)?;

        // Pushes from a checkout go straight to the upstream.
        let output = self
            .run_git(&dir, &["remote", "set-url", "origin", &self.settings.url])
            .await?;
        check(&output)?;

        Ok(checkout)
    }

    async fn commits_between(&self, old: &str, new: &str, paths: &[String]) -> Result<Vec<Commit>> {
        self.ensure_initialized()?;
        let range = format!("{}..{}", old, new);
        let mut args = vec!["log", "--reverse", LOG_FORMAT, range.as_str()];
        self.pathspec(&mut args, paths);
        let output = self.run_git(&self.mirror_dir, &args).await?;
        check(&output)?;
        Ok(parse_commit_log(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn commits_before(&self, new: &str, paths: &[String]) -> Result<Vec<Commit>> {
        self.ensure_initialized()?;
        let mut args = vec!["log", "--reverse", LOG_FORMAT, new];
        self.pathspec(&mut args, paths);
        let output = self.run_git(&self.mirror_dir, &args).await?;
        check(&output)?;
        Ok(parse_commit_log(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn changed_files(&self, since: &str, to: &str, paths: &[String]) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        let mut args = vec!["diff", "--name-only", since, to];
        self.pathspec(&mut args, paths);
        let output = self.run_git(&self.mirror_dir, &args).await?;
        check(&output)?;
        Ok(parse_name_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn note_revisions(&self) -> Result<HashSet<String>> {
        self.ensure_initialized()?;
        let notes_ref = self.notes_ref();
        let exists = self
            .run_git(&self.mirror_dir, &["rev-parse", "--verify", "--quiet", &notes_ref])
            .await?;
        if !exists.status.success() {
            return Ok(HashSet::new());
        }

        let output = self
            .run_git(&self.mirror_dir, &["notes", "--ref", &notes_ref, "list"])
            .await?;
        check(&output)?;
        Ok(parse_note_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn get_note(&self, revision: &str) -> Result<Option<String>> {
        self.ensure_initialized()?;
        let notes_ref = self.notes_ref();
        let output = self
            .run_git(
                &self.mirror_dir,
                &["notes", "--ref", &notes_ref, "show", revision],
            )
            .await?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
        }
        let text = format_git_error(&output);
        if text.to_lowercase().contains("no note found") {
            return Ok(None);
        }
        Err(classify_git_error(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_not_initialized() {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::new(dir.path(), GitSettings::new("/nonexistent/upstream.git"));
        assert!(!repo.is_initialized());

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(repo.head_revision());
        assert!(matches!(result, Err(GitError::NotInitialized(_))));
    }

    #[test]
    fn test_refresh_fails_for_missing_upstream() {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::new(dir.path(), GitSettings::new("/nonexistent/upstream.git"));

        let rt = tokio::runtime::Runtime::new().unwrap();
        assert!(rt.block_on(repo.refresh()).is_err());
        assert!(!repo.is_initialized());
    }

    #[test]
    fn test_notes_ref_expansion() {
        let dir = TempDir::new().unwrap();
        let mut settings = GitSettings::new("/upstream.git");
        let repo = GitRepository::new(dir.path(), settings.clone());
        assert_eq!(repo.notes_ref(), "refs/notes/gitwarden");

        settings.notes_ref = "refs/notes/custom".to_string();
        let repo = GitRepository::new(dir.path(), settings);
        assert_eq!(repo.notes_ref(), "refs/notes/custom");
    }
}

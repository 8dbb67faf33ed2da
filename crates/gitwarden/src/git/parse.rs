//! Git output parsing helpers.

use std::collections::HashSet;
use std::process::Output;

use super::types::{Commit, RemoteTag};

/// Format string for `git log` that [`parse_commit_log`] understands.
pub const LOG_FORMAT: &str = "--format=%H%x09%s";

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses `git log` output produced with [`LOG_FORMAT`].
pub fn parse_commit_log(output: &str) -> Vec<Commit> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once('\t') {
            Some((revision, subject)) => Commit::new(revision.trim(), subject),
            None => Commit::new(line.trim(), ""),
        })
        .collect()
}

/// Parses `git notes list`, which prints `<note-blob> <annotated-object>` per line.
pub fn parse_note_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

/// Extracts a tag's position from `git ls-remote` output.
///
/// Annotated tags are listed twice: the tag object, then the peeled commit
/// under `<ref>^{}`.
pub fn parse_remote_tag(output: &str, tag: &str) -> Option<RemoteTag> {
    let refname = format!("refs/tags/{}", tag);
    let peeled = format!("{}^{{}}", refname);

    let mut object = None;
    let mut commit = None;
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(hash), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        if name == refname {
            object = Some(hash.to_string());
        } else if name == peeled {
            commit = Some(hash.to_string());
        }
    }

    object.map(|object| RemoteTag {
        commit: commit.unwrap_or_else(|| object.clone()),
        object,
    })
}

/// Splits `--name-only` style output into paths.
pub fn parse_name_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

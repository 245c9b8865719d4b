//! Summary of what the current branch changes relative to a base branch.

use crate::models::error::GitError;
use camino::Utf8Path;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_BASE_BRANCH: &str = "main";
pub const DEFAULT_MAX_DIFF_LINES: usize = 500;
pub const DIFF_NOT_INCLUDED: &str = "Diff not included (set include_diff=true to see full diff)";

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FileChanges {
    pub base_branch: String,
    /// `git diff --name-status` output.
    pub files_changed: String,
    /// `git diff --stat` output.
    pub statistics: String,
    /// One line per commit on the branch.
    pub commits: String,
    pub diff: String,
    pub truncated: bool,
    /// Lines of the full diff before truncation, 0 when the diff was not requested.
    pub total_diff_lines: usize,
}

/// Collects changed files, diff statistics, commits and the diff between
/// `base_branch` and `HEAD`.
///
/// The diff is cut after `max_diff_lines` lines with a note saying so. Git
/// runs in `working_directory`, or in the process's directory without one.
///
/// # Errors
///
/// [`GitError::Command`] with git's stderr when any git command fails,
/// [`GitError::Spawn`] when git cannot be started.
#[tracing::instrument]
pub async fn analyze_file_changes(
    base_branch: &str,
    include_diff: bool,
    max_diff_lines: usize,
    working_directory: Option<&Utf8Path>,
) -> Result<FileChanges, GitError> {
    let range = format!("{base_branch}...HEAD");
    let files_changed = git(working_directory, &["diff", "--name-status", &range]).await?;
    let statistics = git(working_directory, &["diff", "--stat", &range]).await?;

    let (diff, truncated, total_diff_lines) = if include_diff {
        let full = git(working_directory, &["diff", &range]).await?;
        truncate_diff(&full, max_diff_lines)
    } else {
        (DIFF_NOT_INCLUDED.to_owned(), false, 0)
    };

    let commits = git(
        working_directory,
        &["log", "--oneline", &format!("{base_branch}..HEAD")],
    )
    .await?;

    debug!(total_diff_lines, truncated, "Analyzed branch changes");
    Ok(FileChanges {
        base_branch: base_branch.to_owned(),
        files_changed,
        statistics,
        commits,
        diff,
        truncated,
        total_diff_lines,
    })
}

fn truncate_diff(full: &str, max_lines: usize) -> (String, bool, usize) {
    let lines: Vec<&str> = full.split('\n').collect();
    let total = lines.len();
    if total <= max_lines {
        return (full.to_owned(), false, total);
    }
    let mut diff = lines[..max_lines].join("\n");
    diff.push_str(&format!(
        "\n\n... Output truncated. Showing {max_lines} of {total} lines ...\n... Use max_diff_lines parameter to see more ..."
    ));
    (diff, true, total)
}

async fn git(cwd: Option<&Utf8Path>, args: &[&str]) -> Result<String, GitError> {
    let mut command = Command::new("git");
    command.args(args).kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let output = command.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        warn!(?args, %stderr, "Git command failed");
        return Err(GitError::Command { stderr });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

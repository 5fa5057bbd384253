//! On-disk git operations: clone or pull, branch switching and introspection

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{GitImportError, GitImportErrorKind};
use crate::webhook::BRANCH_REF_PREFIX;

const REMOTE_SCHEMES: [&str; 4] = ["http:", "https:", "git:", "file:"];

/// Why a single git invocation did not succeed
#[derive(Debug, thiserror::Error)]
pub enum GitCommandError {
    #[error("failed to start git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git timed out after {0:?}")]
    TimedOut(Duration),

    #[error("git exited with {code:?}")]
    Failed { code: Option<i32>, output: String },
}

impl GitCommandError {
    fn output(&self) -> String {
        match self {
            Self::Failed { output, .. } => output.clone(),
            other => other.to_string(),
        }
    }
}

/// Result of a successful synchronization
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Name of the working directory under the repository root
    pub repo_dir: String,
    pub path: PathBuf,
    pub commit: String,
    pub branch: String,
    pub author: Option<String>,
    /// Captured output of the git commands, for auditing
    pub git_log: String,
}

/// Latest commit of a working copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitDetails {
    pub commit: String,
    pub author: String,
    pub date: String,
}

/// Checks that `remote` ends in `.git` or starts with a known scheme.
pub fn validate_remote(remote: &str) -> Result<(), GitImportError> {
    if remote.ends_with(".git") || REMOTE_SCHEMES.iter().any(|s| remote.starts_with(s)) {
        Ok(())
    } else {
        Err(GitImportError::new(GitImportErrorKind::UrlBad))
    }
}

/// Working directory name: the hint's last component if given, else the
/// last path segment of `remote` with its `.git` suffix removed.
pub fn local_dir_name(remote: &str, hint: Option<&str>) -> Result<String, GitImportError> {
    let name = match hint.filter(|h| !h.trim().is_empty()) {
        Some(hint) => Path::new(hint.trim())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        None => {
            let segment = remote
                .trim_end_matches('/')
                .rsplit(['/', ':'])
                .next()
                .unwrap_or_default();
            segment
                .rsplit_once(".git")
                .map(|(head, _)| head)
                .unwrap_or(segment)
                .to_string()
        }
    };

    if name.is_empty() || name == "." || name == ".." {
        return Err(GitImportError::new(GitImportErrorKind::UrlBad));
    }
    Ok(name)
}

/// Runs git in `cwd` and returns stdout followed by stderr.
///
/// Command line, working directory and output are logged at debug level.
pub async fn cmd_log(args: &[&str], cwd: &Path, timeout: Duration) -> Result<String, GitCommandError> {
    debug!(
        "Command was: git {}. Working directory was: {}",
        args.join(" "),
        cwd.display()
    );

    let child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| GitCommandError::TimedOut(timeout))??;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    debug!("Command output was: {:?}", combined);

    if output.status.success() {
        Ok(combined)
    } else {
        Err(GitCommandError::Failed {
            code: output.status.code(),
            output: combined,
        })
    }
}

/// Repository synchronizer rooted at the configured repository directory
#[derive(Debug, Clone)]
pub struct GitSync {
    repo_root: PathBuf,
    timeout: Duration,
}

impl GitSync {
    pub fn new(repo_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_root: repo_root.into(),
            timeout,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn run(
        &self,
        args: &[&str],
        cwd: &Path,
        kind: GitImportErrorKind,
        what: &str,
    ) -> Result<String, GitImportError> {
        cmd_log(args, cwd, self.timeout).await.map_err(|e| {
            let output = e.output();
            error!("{}: {:?}", what, output);
            GitImportError::new(kind).with_output(output)
        })
    }

    /// Clones `remote` into the repository root, or pulls if the working
    /// directory already exists, then optionally switches branch.
    pub async fn sync(
        &self,
        remote: &str,
        local_dir_hint: Option<&str>,
        branch: Option<&str>,
    ) -> Result<SyncReport, GitImportError> {
        if !self.repo_root.is_dir() {
            return Err(GitImportError::no_dir(&self.repo_root));
        }
        validate_remote(remote)?;

        let repo_dir = local_dir_name(remote, local_dir_hint)?;
        debug!("repo_dir = {}", repo_dir);
        let path = self.repo_root.join(&repo_dir);

        let mut git_log = if path.exists() {
            info!("directory already exists, doing a git pull instead of git clone");
            self.run(&["pull"], &path, GitImportErrorKind::CannotPull, "Error running git pull")
                .await?
        } else {
            self.run(
                &["clone", remote, &repo_dir],
                &self.repo_root,
                GitImportErrorKind::CannotPull,
                "Error running git clone",
            )
            .await?
        };

        if let Some(branch) = branch.map(str::trim).filter(|b| !b.is_empty()) {
            self.switch_branch(branch, &path).await?;
        }

        let commit = self
            .run(
                &["log", "-1", "--format=%H"],
                &path,
                GitImportErrorKind::BadRepo,
                "Unable to get git log",
            )
            .await?
            .trim()
            .to_string();
        git_log.push_str(&format!("\nCommit ID: {}", commit));

        let current_branch = self
            .run(
                &["symbolic-ref", "--short", "HEAD"],
                &path,
                GitImportErrorKind::BadRepo,
                "Unable to determine branch",
            )
            .await?
            .trim()
            .to_string();
        git_log.push_str(&format!("   \nBranch: {}", current_branch));

        let author = cmd_log(&["log", "-1", "--format=%an <%ae>"], &path, self.timeout)
            .await
            .ok()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        Ok(SyncReport {
            repo_dir,
            path,
            commit,
            branch: current_branch,
            author,
            git_log,
        })
    }

    /// Checks out `branch` from origin and hard-resets to its tip.
    ///
    /// The reset runs even when the branch already exists locally, so a
    /// directory left behind by an interrupted switch converges.
    pub async fn switch_branch(&self, branch: &str, dir: &Path) -> Result<(), GitImportError> {
        self.run(&["fetch"], dir, GitImportErrorKind::CannotBranch, "Unable to fetch remote")
            .await?;

        let remote_ref = format!("{}{}", BRANCH_REF_PREFIX, branch);
        let remote_branches = self
            .run(
                &["ls-remote", "origin", "-h", &remote_ref],
                dir,
                GitImportErrorKind::CannotBranch,
                "Getting a list of remote branches failed",
            )
            .await?;
        let on_remote = remote_branches
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(remote_ref.as_str()));
        if !on_remote {
            return Err(GitImportError::new(GitImportErrorKind::RemoteBranchMissing));
        }

        let local_branches = self
            .run(
                &["branch", "-a"],
                dir,
                GitImportErrorKind::CannotBranch,
                "Getting a list of local branches failed",
            )
            .await?;
        let exists_locally = local_branches
            .lines()
            .map(|line| line.replace('*', ""))
            .any(|line| line.trim() == branch);

        let tracking = format!("origin/{}", branch);
        if !exists_locally {
            // Checkout with -b since it is remote only
            self.run(
                &["checkout", "--force", "--track", "-b", branch, &tracking],
                dir,
                GitImportErrorKind::CannotBranch,
                "Unable to checkout remote branch",
            )
            .await?;
        } else {
            self.run(
                &["checkout", "--force", branch],
                dir,
                GitImportErrorKind::CannotBranch,
                "Unable to checkout local branch",
            )
            .await?;
        }

        self.run(
            &["reset", "--hard", &tracking],
            dir,
            GitImportErrorKind::CannotBranch,
            "Unable to reset to branch",
        )
        .await?;
        Ok(())
    }

    /// Latest commit of `<repo_root>/<course_dir>`, `None` if it can't be read.
    pub async fn commit_details(&self, course_dir: &str) -> Option<CommitDetails> {
        if course_dir.is_empty() || course_dir.contains(['/', '\\']) || course_dir == ".." {
            return None;
        }
        let path = self.repo_root.join(course_dir);
        if !path.is_dir() {
            return None;
        }
        let output = cmd_log(&["log", "-1", "--format=%H%n%an%n%cI"], &path, self.timeout)
            .await
            .ok()?;
        let mut lines = output.lines();
        Some(CommitDetails {
            commit: lines.next()?.trim().to_string(),
            author: lines.next().unwrap_or_default().trim().to_string(),
            date: lines.next().unwrap_or_default().trim().to_string(),
        })
    }
}

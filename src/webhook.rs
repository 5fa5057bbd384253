//! Push event parsing and the decision whether a push should trigger an import

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::BranchPolicy;

/// Prefix of a fully qualified branch ref
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Repository section of a push payload
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RepositoryInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ssh_url: String,
    #[serde(default)]
    pub clone_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    #[serde(default)]
    repository: RepositoryInfo,
    #[serde(default, rename = "ref")]
    pushed_ref: String,
}

/// Data extracted from the webhook request, consumed once by [`decide`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event_type: String,
    pub repository: RepositoryInfo,
    pub pushed_ref: String,
}

impl WebhookEvent {
    /// Parses the JSON body. Missing fields become empty strings so the
    /// decision rules can report which one is absent.
    pub fn from_payload(event_type: &str, body: &[u8]) -> Result<Self, serde_json::Error> {
        let payload: PushPayload = serde_json::from_slice(body)?;
        Ok(Self {
            event_type: event_type.to_string(),
            repository: payload.repository,
            pushed_ref: payload.pushed_ref,
        })
    }

    /// ssh url when present, clone url otherwise
    pub fn remote_url(&self) -> Option<&str> {
        [&self.repository.ssh_url, &self.repository.clone_url]
            .into_iter()
            .map(|u| u.trim())
            .find(|u| !u.is_empty())
    }
}

/// Strips `refs/heads/` from a pushed ref
pub fn clean_branch_name(pushed_ref: &str) -> &str {
    pushed_ref
        .strip_prefix(BRANCH_REF_PREFIX)
        .unwrap_or(pushed_ref)
}

/// A local working copy known to the synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRepo {
    pub path: PathBuf,
    /// Fully qualified ref of the checked out branch, `None` when detached
    pub active_ref: Option<String>,
}

pub trait RepoLookup {
    /// Returns `None` when no local copy of `repo_name` exists.
    fn local_repo(&self, repo_name: &str) -> Option<LocalRepo>;
}

impl RepoLookup for HashMap<String, LocalRepo> {
    fn local_repo(&self, repo_name: &str) -> Option<LocalRepo> {
        self.get(repo_name).cloned()
    }
}

/// Looks up working copies under the repository root directory
#[derive(Debug, Clone)]
pub struct RepoDirLookup {
    repo_root: PathBuf,
}

impl RepoDirLookup {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }
}

impl RepoLookup for RepoDirLookup {
    fn local_repo(&self, repo_name: &str) -> Option<LocalRepo> {
        if repo_name.is_empty()
            || repo_name.contains(['/', '\\'])
            || repo_name == ".."
            || repo_name == "."
        {
            return None;
        }
        let path = self.repo_root.join(repo_name);
        let git_dir = path.join(".git");
        if !git_dir.is_dir() {
            debug!("No git working copy at {}", path.display());
            return None;
        }
        let active_ref = read_head_ref(&git_dir);
        Some(LocalRepo { path, active_ref })
    }
}

/// Reads the symbolic ref from `.git/HEAD`
fn read_head_ref(git_dir: &Path) -> Option<String> {
    let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref:")
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

/// Arguments for the repository synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncParams {
    pub remote: String,
    pub local_dir: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("The API works for 'Push' events only")]
    NotAPushEvent,

    #[error("Couldn't find Repo's name in the payload")]
    MissingRepoName,

    #[error("Couldn't find Repo's ssh_url or clone_url in the payload")]
    MissingRepoUrl,

    #[error("Couldn't find Repo's pushed branch ref in the payload")]
    MissingRef,

    #[error("The pushed branch ({pushed_ref}) is not currently in use")]
    BranchMismatch { pushed_ref: String },

    #[error("No default branch is configured for new course repositories")]
    MissingDefaultBranch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept(SyncParams),
    Reject(RejectReason),
}

/// Decides whether a push event should trigger an import.
///
/// Rules run in order and the first failing one is reported.
pub fn decide<L: RepoLookup + ?Sized>(
    event: &WebhookEvent,
    lookup: &L,
    policy: &BranchPolicy,
) -> Decision {
    if event.event_type != "push" {
        return Decision::Reject(RejectReason::NotAPushEvent);
    }
    let repo_name = event.repository.name.trim();
    if repo_name.is_empty() {
        return Decision::Reject(RejectReason::MissingRepoName);
    }
    let Some(remote) = event.remote_url() else {
        return Decision::Reject(RejectReason::MissingRepoUrl);
    };
    if event.pushed_ref.is_empty() {
        return Decision::Reject(RejectReason::MissingRef);
    }

    match lookup.local_repo(repo_name) {
        None => {
            let branch = clean_branch_name(&event.pushed_ref);
            if let BranchPolicy::DefaultBranchGated { default_branch } = policy {
                match default_branch.as_deref() {
                    None => return Decision::Reject(RejectReason::MissingDefaultBranch),
                    Some(expected) if clean_branch_name(expected) != branch => {
                        return Decision::Reject(RejectReason::BranchMismatch {
                            pushed_ref: event.pushed_ref.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
            Decision::Accept(SyncParams {
                remote: remote.to_string(),
                local_dir: Some(repo_name.to_string()),
                branch: Some(branch.to_string()),
            })
        }
        Some(local) => {
            if local.active_ref.as_deref() != Some(event.pushed_ref.as_str()) {
                return Decision::Reject(RejectReason::BranchMismatch {
                    pushed_ref: event.pushed_ref.clone(),
                });
            }
            Decision::Accept(SyncParams {
                remote: remote.to_string(),
                local_dir: Some(repo_name.to_string()),
                branch: None,
            })
        }
    }
}

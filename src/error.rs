use serde::Serialize;
use std::io;

/// Broad classification used by callers to pick an HTTP status or log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConfigurationMissing,
    InputInvalid,
    AuthenticationFailed,
    VersionControlFailed,
    ImporterFailed,
}

/// The ways a git import can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GitImportErrorKind {
    NoDir,
    UrlBad,
    BadRepo,
    CannotPull,
    CannotBranch,
    RemoteBranchMissing,
    XmlImportFailed,
    UnsupportedStore,
}

impl GitImportErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::NoDir => ErrorCategory::ConfigurationMissing,
            Self::UrlBad => ErrorCategory::InputInvalid,
            Self::BadRepo | Self::CannotPull | Self::CannotBranch | Self::RemoteBranchMissing => {
                ErrorCategory::VersionControlFailed
            }
            Self::XmlImportFailed | Self::UnsupportedStore => ErrorCategory::ImporterFailed,
        }
    }

    /// Human readable message used when no more specific text is available.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NoDir => "Repository root doesn't exist",
            Self::UrlBad => {
                "Non usable git url provided. Expecting something like: git@github.com:edx/edx4edx_lite.git"
            }
            Self::BadRepo => "Unable to get git log",
            Self::CannotPull => "git clone or pull failed!",
            Self::CannotBranch => {
                "Unable to switch to specified branch. Please check your branch name."
            }
            Self::RemoteBranchMissing => "The specified remote branch is not available.",
            Self::XmlImportFailed => "Unable to run import command.",
            Self::UnsupportedStore => "The underlying module store does not support import.",
        }
    }
}

/// Error raised by the repository synchronizer and the import orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GitImportError {
    pub kind: GitImportErrorKind,
    pub message: String,
    /// Output of the failing command, kept for the import log
    pub output: Option<String>,
}

impl GitImportError {
    pub fn new(kind: GitImportErrorKind) -> Self {
        Self::with_message(kind, kind.default_message())
    }

    pub fn with_message(kind: GitImportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn no_dir(repo_dir: &std::path::Path) -> Self {
        Self::with_message(
            GitImportErrorKind::NoDir,
            format!(
                "Path {} doesn't exist, please create it, or configure a different path with git_repo_dir",
                repo_dir.display()
            ),
        )
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}

impl From<GitImportErrorKind> for GitImportError {
    fn from(kind: GitImportErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Custom error type for git_course_sync operations
#[derive(Debug, thiserror::Error)]
pub enum SysadminError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error(transparent)]
    GitImport(#[from] GitImportError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use SysadminError
pub type Result<T> = std::result::Result<T, SysadminError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_categories() {
        assert_eq!(
            GitImportErrorKind::NoDir.category(),
            ErrorCategory::ConfigurationMissing
        );
        assert_eq!(GitImportErrorKind::UrlBad.category(), ErrorCategory::InputInvalid);
        assert_eq!(
            GitImportErrorKind::RemoteBranchMissing.category(),
            ErrorCategory::VersionControlFailed
        );
        assert_eq!(
            GitImportErrorKind::UnsupportedStore.category(),
            ErrorCategory::ImporterFailed
        );
    }

    #[test]
    fn display_uses_message() {
        let err = GitImportError::new(GitImportErrorKind::CannotPull);
        assert_eq!(err.to_string(), "git clone or pull failed!");

        let err = GitImportError::no_dir(std::path::Path::new("/nowhere"));
        assert_eq!(err.kind, GitImportErrorKind::NoDir);
        assert!(err.to_string().contains("/nowhere"));
    }
}

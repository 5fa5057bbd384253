pub mod api;
pub mod db;
pub mod error;
pub mod git;
pub mod import;
pub mod logging;
pub mod repo_lock;
pub mod signature;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::db::SqlImportLogStore;
use crate::error::SysadminError;
use crate::git::GitSync;
use crate::import::{CommandImporter, CourseImporter, ImportPipeline, ImportSettings, SymlinkAlias};

pub use api::create_router;

pub const DEFAULT_CONFIG_PATH: &str = "sysadmin_config.toml";
pub const WEBHOOK_KEY_ENV: &str = "SYSADMIN_GITHUB_WEBHOOK_KEY";
pub const ADMIN_TOKEN_ENV: &str = "SYSADMIN_ADMIN_TOKEN";

/// How pushes for repositories without a local copy are treated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchPolicy {
    /// Import whatever branch was pushed.
    AcceptFresh,
    /// Import only pushes to the configured default branch.
    DefaultBranchGated { default_branch: Option<String> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchPolicyKind {
    #[default]
    AcceptFresh,
    DefaultBranchGated,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Importer program followed by its leading arguments
    pub command: Vec<String>,
    /// Invoked with the course key after a successful import
    pub publish_command: Option<Vec<String>>,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            command: ["python", "manage.py", "cms", "import"]
                .into_iter()
                .map(String::from)
                .collect(),
            publish_command: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SysadminConfig {
    pub git_repo_dir: PathBuf,
    pub git_import_static: bool,
    pub git_import_python_lib: bool,
    pub python_lib_filename: String,
    pub github_webhook_key: Option<String>,
    pub default_branch: Option<String>,
    pub branch_policy: BranchPolicyKind,
    #[serde(deserialize_with = "lenient_threshold")]
    pub max_git_logs_threshold: Option<i64>,
    pub git_timeout_secs: u64,
    pub record_failed_imports: bool,
    pub database_path: PathBuf,
    pub log_directory: Option<PathBuf>,
    pub admin_token: Option<String>,
    pub importer: ImporterConfig,
}

impl Default for SysadminConfig {
    fn default() -> Self {
        Self {
            git_repo_dir: PathBuf::from("/edx/var/edxapp/course_repos"),
            git_import_static: true,
            git_import_python_lib: true,
            python_lib_filename: "python_lib.zip".to_string(),
            github_webhook_key: None,
            default_branch: None,
            branch_policy: BranchPolicyKind::AcceptFresh,
            max_git_logs_threshold: None,
            git_timeout_secs: 600,
            record_failed_imports: true,
            database_path: PathBuf::from("data/sysadmin.db"),
            log_directory: None,
            admin_token: None,
            importer: ImporterConfig::default(),
        }
    }
}

/// Anything but a positive integer disables retention.
fn lenient_threshold<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<toml::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(toml::Value::Integer(n)) if n > 0 => Some(n),
        _ => None,
    })
}

impl SysadminConfig {
    pub fn branch_policy(&self) -> BranchPolicy {
        match self.branch_policy {
            BranchPolicyKind::AcceptFresh => BranchPolicy::AcceptFresh,
            BranchPolicyKind::DefaultBranchGated => BranchPolicy::DefaultBranchGated {
                default_branch: self.default_branch.clone(),
            },
        }
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn import_settings(&self) -> ImportSettings {
        ImportSettings {
            import_static: self.git_import_static,
            import_python_lib: self.git_import_python_lib,
            python_lib_filename: self.python_lib_filename.clone(),
            record_failed_imports: self.record_failed_imports,
            max_logs_threshold: self.max_git_logs_threshold,
        }
    }

    /// Secrets from the environment win over the file.
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(WEBHOOK_KEY_ENV) {
            self.github_webhook_key = Some(key);
        }
        if let Ok(token) = std::env::var(ADMIN_TOKEN_ENV) {
            self.admin_token = Some(token);
        }
    }
}

/// Parse configuration from TOML text
pub fn parse_config(config_str: &str) -> Result<SysadminConfig, SysadminError> {
    Ok(toml::from_str(config_str)?)
}

/// Load the configuration file. A missing file yields the defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<SysadminConfig, SysadminError> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            SysadminError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        parse_config(&config_str).map_err(|e| {
            SysadminError::ConfigError(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?
    } else {
        info!("No config file at {}, using defaults", path.display());
        SysadminConfig::default()
    };
    config.apply_env();
    Ok(config)
}

/// Builds the import pipeline described by `config` on top of `store`.
pub fn build_pipeline(config: &SysadminConfig, store: SqlImportLogStore) -> ImportPipeline {
    let importer: Arc<dyn CourseImporter> = Arc::new(CommandImporter::new(
        config.importer.command.clone(),
        config.importer.publish_command.clone(),
    ));
    ImportPipeline::new(
        GitSync::new(&config.git_repo_dir, config.git_timeout()),
        importer,
        Arc::new(SymlinkAlias),
        store,
        config.import_settings(),
    )
}

pub struct AppState {
    pub config: SysadminConfig,
    pub pipeline: Arc<ImportPipeline>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: SysadminConfig, pipeline: ImportPipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, SysadminConfig::default());
        assert_eq!(config.branch_policy(), BranchPolicy::AcceptFresh);
        assert_eq!(config.git_timeout(), Duration::from_secs(600));
        assert_eq!(config.importer.command[0], "python");
    }

    #[test]
    fn parses_full_config() {
        let config = parse_config(
            r#"
            git_repo_dir = "/srv/course_repos"
            git_import_static = false
            github_webhook_key = "s3cret"
            default_branch = "main"
            branch_policy = "default_branch_gated"
            max_git_logs_threshold = 5
            git_timeout_secs = 30

            [importer]
            command = ["/usr/local/bin/import-course"]
            publish_command = ["/usr/local/bin/publish-course"]
            "#,
        )
        .unwrap();

        assert_eq!(config.git_repo_dir, PathBuf::from("/srv/course_repos"));
        assert!(!config.git_import_static);
        assert!(config.git_import_python_lib);
        assert_eq!(config.max_git_logs_threshold, Some(5));
        assert_eq!(
            config.branch_policy(),
            BranchPolicy::DefaultBranchGated {
                default_branch: Some("main".to_string())
            }
        );
        assert_eq!(config.importer.command, vec!["/usr/local/bin/import-course"]);
        assert!(!config.import_settings().import_static);
    }

    #[test]
    fn odd_thresholds_disable_retention() {
        for value in ["0", "-3", "\"ten\"", "2.5", "true"] {
            let config = parse_config(&format!("max_git_logs_threshold = {}", value)).unwrap();
            assert_eq!(config.max_git_logs_threshold, None, "value {}", value);
        }
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(parse_config("branch_policy = \"sometimes\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.git_repo_dir, SysadminConfig::default().git_repo_dir);
    }

    #[test]
    fn unreadable_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "git_repo_dir = [").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(SysadminError::ConfigError(_))
        ));
    }
}

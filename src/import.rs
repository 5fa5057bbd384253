//! Import orchestration: sync the repository, run the course importer,
//! record the attempt and apply log retention.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{Level, debug, error, info, warn};

use crate::db::{NewImportLog, SqlImportLogStore};
use crate::error::{GitImportError, GitImportErrorKind};
use crate::git::{GitSync, SyncReport, local_dir_name, validate_remote};
use crate::logging::ImportLogSink;
use crate::repo_lock::RepoLocks;

/// Exit status an importer uses to say the content store can't import (EX_UNAVAILABLE)
pub const UNSUPPORTED_STORE_EXIT_CODE: i32 = 69;

static COURSE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"===> IMPORTING courselike (\S+)").expect("course line pattern is valid")
});

/// Structured course identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CourseKey {
    pub org: String,
    pub course: String,
    pub run: String,
}

impl CourseKey {
    /// Accepts `org/course/run` and `course-v1:org+course+run`.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = match s.strip_prefix("course-v1:") {
            Some(rest) => rest.split('+').collect(),
            None => s.split('/').collect(),
        };
        match parts.as_slice() {
            [org, course, run] if [org, course, run].iter().all(|p| !p.is_empty()) => Some(Self {
                org: org.to_string(),
                course: course.to_string(),
                run: run.to_string(),
            }),
            _ => None,
        }
    }

    /// Sink that keeps the importer's course line even if it gets evicted.
    pub fn watching_sink() -> ImportLogSink {
        ImportLogSink::watching(&COURSE_LINE)
    }

    /// Course reported to a sink from [`CourseKey::watching_sink`].
    pub fn from_sink(sink: &ImportLogSink) -> Option<Self> {
        Self::parse(&sink.first_capture()?)
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "course-v1:{}+{}+{}", self.org, self.course, self.run)
    }
}

impl Serialize for CourseKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What the importer is asked to import
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub repo_root: PathBuf,
    pub local_dir: String,
    pub import_static: bool,
    pub import_python_lib: bool,
    pub python_lib_filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImporterFailure {
    #[error("import command failed: {0}")]
    CommandFailed(String),

    #[error("content store does not support import")]
    UnsupportedStore,
}

impl From<ImporterFailure> for GitImportError {
    fn from(failure: ImporterFailure) -> Self {
        let kind = match failure {
            ImporterFailure::CommandFailed(_) => GitImportErrorKind::XmlImportFailed,
            ImporterFailure::UnsupportedStore => GitImportErrorKind::UnsupportedStore,
        };
        GitImportError::new(kind).with_output(failure.to_string())
    }
}

/// The course-content importer and the content store it feeds
#[async_trait]
pub trait CourseImporter: Send + Sync {
    /// Imports the course under `request.repo_root/request.local_dir`,
    /// writing all of its output to `sink`.
    async fn import(&self, request: &ImportRequest, sink: &ImportLogSink)
    -> Result<(), ImporterFailure>;

    /// Tells the content store that `course` was created or updated.
    async fn publish(&self, course: &CourseKey) -> Result<(), ImporterFailure>;
}

/// Runs an external import program
#[derive(Debug, Clone)]
pub struct CommandImporter {
    command: Vec<String>,
    publish_command: Option<Vec<String>>,
}

impl CommandImporter {
    pub fn new(command: Vec<String>, publish_command: Option<Vec<String>>) -> Self {
        Self {
            command,
            publish_command,
        }
    }

    fn args_for(request: &ImportRequest) -> Vec<String> {
        let mut args = vec![
            request.repo_root.to_string_lossy().into_owned(),
            request.local_dir.clone(),
        ];
        if !request.import_static {
            args.push("--nostatic".to_string());
        }
        if !request.import_python_lib {
            args.push("--nopythonlib".to_string());
        }
        args.push("--python-lib-filename".to_string());
        args.push(request.python_lib_filename.clone());
        args
    }
}

/// Copies output into the sink until EOF. Invalid UTF-8 is replaced, never
/// fatal, so the pipe keeps draining.
async fn forward_lines<R: AsyncRead + Unpin>(reader: Option<R>, sink: ImportLogSink) {
    let Some(reader) = reader else { return };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.importer_line(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                sink.pipeline(Level::WARN, format!("Failed to read importer output: {}", e));
                break;
            }
        }
    }
}

#[async_trait]
impl CourseImporter for CommandImporter {
    async fn import(
        &self,
        request: &ImportRequest,
        sink: &ImportLogSink,
    ) -> Result<(), ImporterFailure> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| ImporterFailure::CommandFailed("importer command is empty".into()))?;
        let args = Self::args_for(request);
        info!("Running importer: {} {} {}", program, leading.join(" "), args.join(" "));

        let mut child = Command::new(program)
            .args(leading)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ImporterFailure::CommandFailed(format!("failed to start {}: {}", program, e)))?;

        let stdout = forward_lines(child.stdout.take(), sink.clone());
        let stderr = forward_lines(child.stderr.take(), sink.clone());
        let (status, _, _) = tokio::join!(child.wait(), stdout, stderr);
        let status = status.map_err(|e| ImporterFailure::CommandFailed(e.to_string()))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(UNSUPPORTED_STORE_EXIT_CODE) => Err(ImporterFailure::UnsupportedStore),
            code => Err(ImporterFailure::CommandFailed(format!(
                "{} exited with {:?}",
                program, code
            ))),
        }
    }

    async fn publish(&self, course: &CourseKey) -> Result<(), ImporterFailure> {
        let Some((program, leading)) = self.publish_command.as_ref().and_then(|c| c.split_first())
        else {
            info!("Course published: {}", course);
            return Ok(());
        };
        let output = Command::new(program)
            .args(leading)
            .arg(course.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ImporterFailure::CommandFailed(format!("failed to start {}: {}", program, e)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ImporterFailure::CommandFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ))
        }
    }
}

/// Keeps a stable course-named path pointing at the current clone
pub trait StableAlias: Send + Sync {
    fn ensure_alias(&self, stable: &Path, target: &Path) -> io::Result<()>;
}

/// Aliases with filesystem symlinks
#[derive(Debug, Clone, Copy, Default)]
pub struct SymlinkAlias;

impl StableAlias for SymlinkAlias {
    fn ensure_alias(&self, stable: &Path, target: &Path) -> io::Result<()> {
        if stable == target {
            return Ok(());
        }
        match std::fs::symlink_metadata(stable) {
            Ok(meta) if meta.file_type().is_symlink() => {
                if std::fs::read_link(stable)? == target {
                    return Ok(());
                }
                std::fs::remove_file(stable)?;
            }
            Ok(meta) if meta.is_dir() => {
                debug!("   -> exists, but is not symlink");
                // only an empty directory is replaced
                std::fs::remove_dir(stable)?;
            }
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a directory", stable.display()),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        debug!(
            "   -> creating symlink between {} and {}",
            target.display(),
            stable.display()
        );
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, stable)?;
        #[cfg(windows)]
        std::os::windows::fs::symlink_dir(target, stable)?;
        Ok(())
    }
}

/// Settings the pipeline reads from configuration
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub import_static: bool,
    pub import_python_lib: bool,
    pub python_lib_filename: String,
    pub record_failed_imports: bool,
    pub max_logs_threshold: Option<i64>,
}

/// Outcome of one import attempt
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub repo_dir: String,
    pub course_id: Option<CourseKey>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub git_log: String,
    pub import_log: String,
    pub log_id: Option<i64>,
    pub removed_logs: u64,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<GitImportError>,
}

fn serialize_error<S: Serializer>(
    error: &Option<GitImportError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.collect_str(e),
        None => serializer.serialize_none(),
    }
}

impl ImportReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs sync + import + record + retention for one repository at a time per
/// working directory.
pub struct ImportPipeline {
    git: GitSync,
    importer: Arc<dyn CourseImporter>,
    alias: Arc<dyn StableAlias>,
    store: SqlImportLogStore,
    locks: RepoLocks,
    settings: ImportSettings,
}

impl ImportPipeline {
    pub fn new(
        git: GitSync,
        importer: Arc<dyn CourseImporter>,
        alias: Arc<dyn StableAlias>,
        store: SqlImportLogStore,
        settings: ImportSettings,
    ) -> Self {
        let locks = RepoLocks::with_lock_dir(git.repo_root());
        Self {
            git,
            importer,
            alias,
            store,
            locks,
            settings,
        }
    }

    pub fn git(&self) -> &GitSync {
        &self.git
    }

    pub fn store(&self) -> &SqlImportLogStore {
        &self.store
    }

    /// Checks the repository root and the remote before any repository work
    /// and returns the working directory name.
    pub fn preflight(&self, remote: &str, local_dir: Option<&str>) -> Result<String, GitImportError> {
        let repo_root = self.git.repo_root();
        if !repo_root.is_dir() {
            return Err(GitImportError::no_dir(repo_root));
        }
        validate_remote(remote)?;
        local_dir_name(remote, local_dir)
    }

    /// Imports `remote` into the content store.
    ///
    /// Configuration and input problems (`NoDir`, `UrlBad`) are returned as
    /// `Err` before any repository work. Every later failure is reported in
    /// the returned [`ImportReport`] and recorded in the import log.
    pub async fn add_repo(
        &self,
        remote: &str,
        local_dir: Option<&str>,
        branch: Option<&str>,
    ) -> Result<ImportReport, GitImportError> {
        let repo_dir = self.preflight(remote, local_dir)?;

        let _guard = self.locks.lock(&repo_dir).await.map_err(|e| {
            GitImportError::with_message(
                GitImportErrorKind::CannotPull,
                format!("Unable to lock working directory {}: {}", repo_dir, e),
            )
        })?;
        debug!("Acquired working directory lock for {}", repo_dir);

        let sink = CourseKey::watching_sink();
        let result = match self.git.sync(remote, Some(&repo_dir), branch).await {
            Ok(sync) => {
                let imported = self.import_course(&sync, &sink).await;
                (Some(sync), imported)
            }
            Err(e) => (None, Err(e)),
        };

        let (sync, imported) = result;
        let (course_id, error) = match imported {
            Ok(course_id) => (course_id, None),
            Err(e) => {
                sink.pipeline(Level::ERROR, e.to_string());
                // git output already lands in the git log
                if let (Some(_), Some(output)) = (&sync, e.output.as_deref()) {
                    sink.pipeline(Level::ERROR, output);
                }
                (None, Some(e))
            }
        };

        let git_log = match (&sync, &error) {
            (Some(s), _) => s.git_log.clone(),
            (None, Some(e)) => format!("{}\n{}", e, e.output.as_deref().unwrap_or_default()),
            (None, None) => String::new(),
        };

        let mut report = ImportReport {
            repo_dir,
            course_id,
            commit: sync.as_ref().map(|s| s.commit.clone()),
            branch: sync.as_ref().map(|s| s.branch.clone()),
            git_log,
            import_log: sink.render(),
            log_id: None,
            removed_logs: 0,
            error,
        };

        if report.succeeded() || self.settings.record_failed_imports {
            self.record(&mut report, sync.as_ref()).await;
        }

        match &report.error {
            None => info!(
                "Imported {} from {} ({})",
                report
                    .course_id
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown course".to_string()),
                remote,
                report.commit.as_deref().unwrap_or_default()
            ),
            Some(e) => error!("Import of {} failed: {}", remote, e),
        }
        Ok(report)
    }

    /// Runs the importer against a synced working directory and returns the
    /// course it reported, if any.
    pub async fn import_course(
        &self,
        sync: &SyncReport,
        sink: &ImportLogSink,
    ) -> Result<Option<CourseKey>, GitImportError> {
        let request = ImportRequest {
            repo_root: self.git.repo_root().to_path_buf(),
            local_dir: sync.repo_dir.clone(),
            import_static: self.settings.import_static,
            import_python_lib: self.settings.import_python_lib,
            python_lib_filename: self.settings.python_lib_filename.clone(),
        };
        self.importer.import(&request, sink).await?;

        let Some(course) = CourseKey::from_sink(sink) else {
            warn!("Importer output for {} names no course", sync.repo_dir);
            return Ok(None);
        };

        if let Err(e) = self.importer.publish(&course).await {
            warn!("Failed to publish {}: {}", course, e);
            sink.pipeline(Level::WARN, format!("Failed to publish {}: {}", course, e));
        }

        let stable = self.git.repo_root().join(&course.course);
        debug!("Studio course dir = {}", stable.display());
        if let Err(e) = self.alias.ensure_alias(&stable, &sync.path) {
            error!("Unable to create course symlink {}: {}", stable.display(), e);
        }

        Ok(Some(course))
    }

    async fn record(&self, report: &mut ImportReport, sync: Option<&SyncReport>) {
        let course_id = report.course_id.as_ref().map(|c| c.to_string());
        let log = NewImportLog {
            course_id: course_id.clone(),
            repo_dir: report.repo_dir.clone(),
            commit: report.commit.clone(),
            author: sync.and_then(|s| s.author.clone()),
            created: Utc::now(),
            course_import_log: report.import_log.clone(),
            git_log: report.git_log.clone(),
        };

        match self.store.insert(&log).await {
            Ok(id) => {
                debug!("saved import log {} for {:?}", id, course_id);
                report.log_id = Some(id);
            }
            Err(e) => {
                error!("Failed to save import log for {}: {}", report.repo_dir, e);
                return;
            }
        }

        let Some(course_id) = course_id else { return };
        match self
            .store
            .trim(&course_id, self.settings.max_logs_threshold)
            .await
        {
            Ok(removed) => {
                if removed > 0 {
                    debug!("removed {} old import logs for {}", removed, course_id);
                }
                report.removed_logs = removed;
            }
            Err(e) => error!("Failed to trim import logs for {}: {}", course_id, e),
        }
    }
}

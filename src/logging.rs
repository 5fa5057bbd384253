use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{Level, debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const MAX_LOG_MEMORY_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Target used when mirroring captured import output to tracing
pub const IMPORT_LOG_TARGET: &str = "course_import";

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: LogSource,
    pub level: Level,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogSource {
    Importer,
    Pipeline,
}

/// Output buffer owned by a single import.
///
/// Cloning shares the buffer, so the importer and the orchestrator can both
/// write to it while nothing else sees the entries. A sink built with
/// [`ImportLogSink::watching`] keeps the first capture of its pattern from
/// importer output even after the matching line has been evicted.
#[derive(Clone)]
pub struct ImportLogSink {
    inner: Arc<Mutex<SinkBuffer>>,
}

struct SinkBuffer {
    entries: VecDeque<LogEntry>,
    size: usize,
    max_size: usize,
    dropped: usize,
    watch: Option<&'static Regex>,
    first_capture: Option<String>,
}

impl ImportLogSink {
    pub fn new() -> Self {
        Self::with_max_size(MAX_LOG_MEMORY_BYTES)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self::build(max_size, None)
    }

    /// Sink that remembers group 1 of the first importer line matching `pattern`.
    pub fn watching(pattern: &'static Regex) -> Self {
        Self::build(MAX_LOG_MEMORY_BYTES, Some(pattern))
    }

    fn build(max_size: usize, watch: Option<&'static Regex>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkBuffer {
                entries: VecDeque::new(),
                size: 0,
                max_size,
                dropped: 0,
                watch,
                first_capture: None,
            })),
        }
    }

    pub fn record(&self, source: LogSource, level: Level, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::ERROR => error!(target: IMPORT_LOG_TARGET, "{}", message),
            Level::WARN => warn!(target: IMPORT_LOG_TARGET, "{}", message),
            _ => debug!(target: IMPORT_LOG_TARGET, "{}", message),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            source,
            level,
            message,
        };
        let entry_size = entry.message.len();

        let mut buffer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if source == LogSource::Importer && buffer.first_capture.is_none() {
            buffer.first_capture = buffer
                .watch
                .and_then(|re| re.captures(&entry.message))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
        }
        buffer.size += entry_size;
        buffer.entries.push_back(entry);
        // Remove oldest entries if we have exceeded memory limit
        while buffer.size > buffer.max_size && buffer.entries.len() > 1 {
            if let Some(old) = buffer.entries.pop_front() {
                buffer.size -= old.message.len();
                buffer.dropped += 1;
            }
        }
    }

    /// Records one line of importer output at debug level.
    pub fn importer_line(&self, line: impl Into<String>) {
        self.record(LogSource::Importer, Level::DEBUG, line);
    }

    pub fn pipeline(&self, level: Level, message: impl Into<String>) {
        self.record(LogSource::Pipeline, level, message);
    }

    /// First capture of the watched pattern, if any importer line matched.
    pub fn first_capture(&self) -> Option<String> {
        let buffer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buffer.first_capture.clone()
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> Vec<LogEntry> {
        let buffer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buffer.entries.iter().cloned().collect()
    }

    /// Captured output as text, one line per entry.
    pub fn render(&self) -> String {
        let buffer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = String::with_capacity(buffer.size + buffer.entries.len() * 8);
        if buffer.dropped > 0 {
            out.push_str(&format!("... ({} earlier lines dropped)\n", buffer.dropped));
        }
        for entry in &buffer.entries {
            if entry.source == LogSource::Pipeline {
                out.push_str(&format!("{}: ", entry.level));
            }
            out.push_str(&entry.message);
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        let buffer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buffer.entries.is_empty()
    }
}

impl Default for ImportLogSink {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FileLogger {
    log_directory: PathBuf,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            rotation: Rotation::DAILY,
        }
    }

    pub fn setup_file_logging(
        &self,
    ) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
        // Ensure log directory exists
        std::fs::create_dir_all(&self.log_directory)?;

        let file_appender = RollingFileAppender::new(
            self.rotation.clone(),
            &self.log_directory,
            "sysadmin_logs", // Prefix for log files
        );

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Installs the global subscriber: console output plus optional rolling files.
///
/// The returned guard must be kept alive for file output to be flushed.
pub fn setup_logging(file_logger: Option<&FileLogger>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file_logger.map(|f| f.setup_file_logging()) {
        Some(Ok((writer, guard))) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false), // Disable ANSI colors for file logs
            ),
            Some(guard),
        ),
        Some(Err(e)) => {
            eprintln!("Failed to set up file logging: {}", e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer()) // Console output
        .with(file_layer)
        .init();

    if guard.is_some() {
        info!("File logging enabled");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_keeps_order() {
        let sink = ImportLogSink::new();
        sink.importer_line("===> IMPORTING courselike edX/DemoX/Demo_Course");
        sink.pipeline(Level::ERROR, "import failed");

        let text = sink.render();
        assert_eq!(
            text,
            "===> IMPORTING courselike edX/DemoX/Demo_Course\nERROR: import failed\n"
        );
        assert_eq!(sink.entries().len(), 2);
    }

    #[test]
    fn clones_share_one_buffer() {
        let sink = ImportLogSink::new();
        let other = sink.clone();
        other.importer_line("hello");
        assert!(!sink.is_empty());

        let unrelated = ImportLogSink::new();
        assert!(unrelated.is_empty());
    }

    #[test]
    fn oldest_entries_are_dropped_past_limit() {
        let sink = ImportLogSink::with_max_size(10);
        sink.importer_line("aaaaaa");
        sink.importer_line("bbbbbb");
        sink.importer_line("cccccc");

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "cccccc");
        assert!(sink.render().starts_with("... (2 earlier lines dropped)"));
    }

    static COURSE: std::sync::LazyLock<Regex> =
        std::sync::LazyLock::new(|| Regex::new(r"IMPORTING courselike (\S+)").unwrap());

    #[test]
    fn watched_capture_survives_eviction() {
        let sink = ImportLogSink::watching(&COURSE);
        sink.pipeline(Level::INFO, "IMPORTING courselike not/from/importer");
        sink.importer_line("===> IMPORTING courselike edX/DemoX/Demo_Course");
        sink.importer_line("===> IMPORTING courselike other/course/later");
        let filler = "x".repeat(63);
        for _ in 0..40_000 {
            sink.importer_line(filler.clone());
        }

        assert!(!sink.render().contains("edX/DemoX/Demo_Course"));
        assert_eq!(sink.first_capture().as_deref(), Some("edX/DemoX/Demo_Course"));
        assert!(ImportLogSink::new().first_capture().is_none());
    }
}

use fslock::LockFile;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Serializes work on a repository working directory.
///
/// Each directory name gets its own async mutex; imports of different
/// repositories still run concurrently. With a lock directory, an advisory
/// file lock `<lock_dir>/.<repo_dir>.lock` is taken as well, so a server and
/// `git_add_course` sharing a repository root exclude each other.
#[derive(Default)]
pub struct RepoLocks {
    /// one lock per working directory name
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    lock_dir: Option<PathBuf>,
}

/// Held for as long as the working directory is in use
pub struct RepoGuard {
    _file: Option<LockFile>,
    _local: OwnedMutexGuard<()>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_dir(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            locks: Mutex::default(),
            lock_dir: Some(lock_dir.into()),
        }
    }

    pub fn lock_file_path(&self, repo_dir: &str) -> Option<PathBuf> {
        self.lock_dir
            .as_ref()
            .map(|dir| dir.join(format!(".{}.lock", repo_dir)))
    }

    /// Waits until no other task or process holds `repo_dir` and returns the guard.
    pub async fn lock(&self, repo_dir: &str) -> io::Result<RepoGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody is waiting on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(repo_dir.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let local = lock.lock_owned().await;

        let file = match self.lock_file_path(repo_dir) {
            Some(path) => Some(lock_file(path).await?),
            None => None,
        };
        Ok(RepoGuard {
            _file: file,
            _local: local,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self, repo_dir: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(repo_dir)
            .map(|l| l.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Blocks on the advisory lock off the async workers.
async fn lock_file(path: PathBuf) -> io::Result<LockFile> {
    tokio::task::spawn_blocking(move || {
        let mut file = LockFile::open(path.as_path())?;
        if !file.try_lock()? {
            debug!("Waiting for {} held by another process", path.display());
            file.lock()?;
        }
        Ok(file)
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_directory_is_exclusive() {
        let locks = Arc::new(RepoLocks::new());
        let guard = locks.lock("edx4edx_lite").await.unwrap();
        assert!(locks.is_locked("edx4edx_lite"));

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("edx4edx_lite").await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!locks.is_locked("edx4edx_lite"));
    }

    #[tokio::test]
    async fn different_directories_do_not_block() {
        let locks = RepoLocks::new();
        let _first = locks.lock("course-a").await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock("course-b")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn file_lock_excludes_independent_lock_sets() {
        let root = tempfile::tempdir().unwrap();
        // Separate maps stand in for separate processes
        let server = RepoLocks::with_lock_dir(root.path());
        let cli = Arc::new(RepoLocks::with_lock_dir(root.path()));
        assert_eq!(
            server.lock_file_path("demo"),
            Some(root.path().join(".demo.lock"))
        );

        let guard = server.lock("demo").await.unwrap();
        assert!(root.path().join(".demo.lock").exists());

        let waiter = {
            let cli = cli.clone();
            tokio::spawn(async move {
                let _guard = cli.lock("demo").await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();

        let _other = tokio::time::timeout(Duration::from_secs(1), cli.lock("other"))
            .await
            .unwrap()
            .unwrap();
    }
}

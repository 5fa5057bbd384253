use crate::error::SysadminError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

/// A persisted import attempt
#[derive(Debug, Clone, Serialize)]
pub struct ImportLog {
    pub id: i64,
    pub course_id: Option<String>,
    pub repo_dir: String,
    pub commit: Option<String>,
    pub author: Option<String>,
    pub created: DateTime<Utc>,
    pub course_import_log: String,
    pub git_log: String,
}

/// Fields of a record about to be inserted
#[derive(Debug, Clone)]
pub struct NewImportLog {
    pub course_id: Option<String>,
    pub repo_dir: String,
    pub commit: Option<String>,
    pub author: Option<String>,
    pub created: DateTime<Utc>,
    pub course_import_log: String,
    pub git_log: String,
}

// Helper struct to map DB row to ImportLog struct
#[derive(FromRow)]
struct ImportLogRow {
    id: i64,
    course_id: Option<String>,
    repo_dir: String,
    commit_hash: Option<String>,
    author: Option<String>,
    created_at: String,
    course_import_log: String,
    git_log: String,
}

impl From<ImportLogRow> for ImportLog {
    fn from(row: ImportLogRow) -> Self {
        let created = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default();

        ImportLog {
            id: row.id,
            course_id: row.course_id,
            repo_dir: row.repo_dir,
            commit: row.commit_hash,
            author: row.author,
            created,
            course_import_log: row.course_import_log,
            git_log: row.git_log,
        }
    }
}

/// Fixed width so that text order matches time order
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Import log records stored in SQLite
#[derive(Clone)]
pub struct SqlImportLogStore {
    pool: SqlitePool,
}

impl SqlImportLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a record, returns the new ID
    pub async fn insert(&self, log: &NewImportLog) -> Result<i64, SysadminError> {
        let result = sqlx::query(
            r#"
            INSERT INTO course_import_logs (
                course_id, repo_dir, commit_hash, author,
                created_at, course_import_log, git_log
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.course_id)
        .bind(&log.repo_dir)
        .bind(&log.commit)
        .bind(&log.author)
        .bind(format_timestamp(&log.created))
        .bind(&log.course_import_log)
        .bind(&log.git_log)
        .execute(&self.pool)
        .await
        .map_err(|e| SysadminError::DatabaseError(format!("Failed to save import log: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    /// Get a record by ID
    pub async fn get(&self, id: i64) -> Result<Option<ImportLog>, SysadminError> {
        let row = sqlx::query_as::<_, ImportLogRow>(
            r#"
            SELECT id, course_id, repo_dir, commit_hash, author,
                   created_at, course_import_log, git_log
            FROM course_import_logs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SysadminError::DatabaseError(format!("Failed to fetch import log: {}", e)))?;

        Ok(row.map(|r| r.into()))
    }

    /// Records newest first, optionally for one course
    pub async fn list(
        &self,
        course_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImportLog>, SysadminError> {
        let rows = sqlx::query_as::<_, ImportLogRow>(
            r#"
            SELECT id, course_id, repo_dir, commit_hash, author,
                   created_at, course_import_log, git_log
            FROM course_import_logs
            WHERE (?1 IS NULL OR course_id = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(course_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SysadminError::DatabaseError(format!("Failed to fetch import logs: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Count records, optionally for one course
    pub async fn count(&self, course_id: Option<&str>) -> Result<i64, SysadminError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM course_import_logs WHERE (?1 IS NULL OR course_id = ?1)",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SysadminError::DatabaseError(format!("Failed to count import logs: {}", e)))?;

        Ok(count.0)
    }

    /// Deletes all but the `threshold` newest records of `course_id`.
    ///
    /// Returns 0 without touching the table unless `threshold` is a positive
    /// integer. The selection and the delete are one statement, so
    /// concurrent trims of the same course cannot interleave.
    pub async fn trim(&self, course_id: &str, threshold: Option<i64>) -> Result<u64, SysadminError> {
        let threshold = match threshold {
            Some(t) if t > 0 => t,
            _ => return Ok(0),
        };

        let result = sqlx::query(
            r#"
            DELETE FROM course_import_logs
            WHERE id IN (
                SELECT id FROM course_import_logs
                WHERE course_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT -1 OFFSET ?
            )
            "#,
        )
        .bind(course_id)
        .bind(threshold)
        .execute(&self.pool)
        .await
        .map_err(|e| SysadminError::DatabaseError(format!("Failed to trim import logs: {}", e)))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;
    use chrono::Duration;

    const COURSE: &str = "course-v1:MITx+6.002x+2013_Spring";

    fn record(course_id: Option<&str>, created: DateTime<Utc>) -> NewImportLog {
        NewImportLog {
            course_id: course_id.map(String::from),
            repo_dir: "edx4edx_lite".to_string(),
            commit: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
            author: Some("Course Author <author@example.com>".to_string()),
            created,
            course_import_log: "===> IMPORTING courselike MITx/6.002x/2013_Spring".to_string(),
            git_log: "Already up to date.".to_string(),
        }
    }

    async fn store() -> SqlImportLogStore {
        SqlImportLogStore::new(init_memory_db().await.unwrap())
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = store().await;
        let created = Utc::now();
        let id = store.insert(&record(Some(COURSE), created)).await.unwrap();

        let log = store.get(id).await.unwrap().unwrap();
        assert_eq!(log.course_id.as_deref(), Some(COURSE));
        assert_eq!(log.repo_dir, "edx4edx_lite");
        assert_eq!(log.created.timestamp_micros(), created.timestamp_micros());
        assert!(store.get(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_filters() {
        let store = store().await;
        let base = Utc::now();
        for i in 0..3 {
            store
                .insert(&record(Some(COURSE), base + Duration::seconds(i)))
                .await
                .unwrap();
        }
        store.insert(&record(None, base)).await.unwrap();

        let all = store.list(None, 10, 0).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(store.count(None).await.unwrap(), 4);

        let course = store.list(Some(COURSE), 2, 0).await.unwrap();
        assert_eq!(course.len(), 2);
        assert!(course[0].created > course[1].created);
        assert_eq!(store.count(Some(COURSE)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn trim_keeps_newest_and_is_idempotent() {
        let store = store().await;
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                store
                    .insert(&record(Some(COURSE), base + Duration::seconds(i)))
                    .await
                    .unwrap(),
            );
        }
        store.insert(&record(Some("course-v1:edX+DemoX+Demo"), base)).await.unwrap();

        assert_eq!(store.trim(COURSE, Some(3)).await.unwrap(), 2);
        let kept: Vec<i64> = store
            .list(Some(COURSE), 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(kept, vec![ids[4], ids[3], ids[2]]);

        assert_eq!(store.trim(COURSE, Some(3)).await.unwrap(), 0);
        assert_eq!(store.count(Some("course-v1:edX+DemoX+Demo")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn trim_without_threshold_is_noop() {
        let store = store().await;
        store.insert(&record(Some(COURSE), Utc::now())).await.unwrap();
        store.insert(&record(Some(COURSE), Utc::now())).await.unwrap();

        assert_eq!(store.trim(COURSE, None).await.unwrap(), 0);
        assert_eq!(store.trim(COURSE, Some(0)).await.unwrap(), 0);
        assert_eq!(store.trim(COURSE, Some(-4)).await.unwrap(), 0);
        assert_eq!(store.trim("course-v1:none+none+none", Some(1)).await.unwrap(), 0);
        assert_eq!(store.count(Some(COURSE)).await.unwrap(), 2);
    }
}

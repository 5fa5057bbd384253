use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

pub mod store;

use crate::error::SysadminError;
pub use store::{ImportLog, NewImportLog, SqlImportLogStore};

/// Initialize the SQLite database connection pool and run migrations
pub async fn init_db(db_path: impl AsRef<Path>) -> Result<SqlitePool, SysadminError> {
    let db_path = db_path.as_ref();
    let db_path_str = db_path.to_string_lossy();

    // Ensure the database file exists or create it
    if !db_path.exists() {
        info!("Database file not found at {}, creating...", db_path_str);
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SysadminError::DatabaseError(format!("Failed to create database directory: {}", e))
            })?;
        }
        std::fs::File::create(db_path).map_err(|e| {
            SysadminError::DatabaseError(format!("Failed to create database file: {}", e))
        })?;
    }

    let db_url = format!("sqlite:{}", db_path_str);
    info!("Connecting to database at {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .map_err(|e| SysadminError::DatabaseError(format!("Failed to connect to database: {}", e)))?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// In-memory database with the schema applied. A single connection keeps
/// every query on the same database.
pub async fn init_memory_db() -> Result<SqlitePool, SysadminError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(|e| SysadminError::DatabaseError(format!("Failed to open database: {}", e)))?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), SysadminError> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| SysadminError::DatabaseError(format!("Failed to run migrations: {}", e)))
}

use git_course_sync::db::{SqlImportLogStore, init_db};
use git_course_sync::logging::{FileLogger, setup_logging};
use git_course_sync::{AppState, DEFAULT_CONFIG_PATH, build_pipeline, create_router, load_config};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path =
        std::env::var("SYSADMIN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Keep the guard alive so buffered file logs get flushed
    let file_logger = config.log_directory.clone().map(FileLogger::new);
    let _log_guard = setup_logging(file_logger.as_ref());

    if config.github_webhook_key.is_none() {
        warn!("No github_webhook_key configured, every webhook will be refused");
    }
    if !config.git_repo_dir.is_dir() {
        warn!(
            "Repository root {} does not exist yet",
            config.git_repo_dir.display()
        );
    }

    let pool = match init_db(&config.database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = build_pipeline(&config, SqlImportLogStore::new(pool));
    let state = Arc::new(AppState::new(config, pipeline));
    let app = create_router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

//! Imports a course repository from the command line.

use clap::Parser;
use git_course_sync::db::{SqlImportLogStore, init_db};
use git_course_sync::logging::setup_logging;
use git_course_sync::{DEFAULT_CONFIG_PATH, build_pipeline, load_config};
use std::process::ExitCode;
use tracing::error;

#[derive(Parser)]
#[command(
    name = "git_add_course",
    about = "Import the specified git repository and optional branch into the content store"
)]
struct Cli {
    /// Repository url, e.g. git@github.com:edx/edx4edx_lite.git
    repository_url: String,

    /// Name of the working directory under the repository root
    #[arg(long)]
    directory_path: Option<String>,

    /// Branch to check out before importing
    #[arg(long)]
    repository_branch: Option<String>,

    /// Configuration file
    #[arg(long, env = "SYSADMIN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = setup_logging(None);

    let config = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let pool = match init_db(&config.database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let pipeline = build_pipeline(&config, SqlImportLogStore::new(pool));

    let report = match pipeline
        .add_repo(
            &cli.repository_url,
            cli.directory_path.as_deref(),
            cli.repository_branch.as_deref(),
        )
        .await
    {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match report.error {
        None => {
            match report.course_id {
                Some(course) => println!("Imported {} from {}", course, report.repo_dir),
                None => println!("Imported {}", report.repo_dir),
            }
            ExitCode::SUCCESS
        }
        Some(e) => {
            eprintln!("{}", e);
            eprintln!("{}", report.git_log);
            eprintln!("{}", report.import_log);
            ExitCode::FAILURE
        }
    }
}

//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `authstore_core` linkage and open a real database end to end.
//! - Print deterministic `key=value` lines for quick local checks.
//!
//! Usage: `authstore_cli [DB_PATH]`. Without a path the probe uses a file
//! under the system temp directory.

use authstore_core::{
    core_version, default_log_level, init_logging, ping, SortOrder, StorageConfig,
    TransactionCoordinator, UserDirectory, UserListQuery,
};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const FIRST_PAGE_SIZE: u32 = 10;

fn main() -> ExitCode {
    println!("authstore_core ping={}", ping());
    println!("authstore_core version={}", core_version());

    let db_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("authstore-cli.db"));

    let log_dir = std::env::temp_dir().join("authstore-logs");
    if let Err(err) = init_logging(default_log_level(), &log_dir.to_string_lossy()) {
        eprintln!("logging disabled: {err}");
    }

    match probe(&db_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_probe module=cli status=error error={message}");
            eprintln!("probe failed: {message}");
            ExitCode::FAILURE
        }
    }
}

fn probe(db_path: &Path) -> Result<(), String> {
    info!(
        "event=cli_probe module=cli status=start db_path={}",
        db_path.display()
    );
    let coordinator = TransactionCoordinator::open(db_path, &StorageConfig::default())
        .map_err(|err| err.to_string())?;
    let directory = UserDirectory::new(coordinator);

    let count = directory.count_users(None).map_err(|err| err.to_string())?;
    println!("db_path={}", db_path.display());
    println!("user_count={count}");

    let page = directory
        .list_users_page(&UserListQuery::new(FIRST_PAGE_SIZE, SortOrder::Descending))
        .map_err(|err| err.to_string())?;
    for user in &page.users {
        println!(
            "user id={} recipe={} time_joined={}",
            user.id(),
            user.recipe_id(),
            user.time_joined()
        );
    }
    if let Some(cursor) = &page.next_cursor {
        println!(
            "next_cursor time_joined={} user_id={}",
            cursor.time_joined, cursor.user_id
        );
    }

    info!("event=cli_probe module=cli status=ok user_count={count}");
    Ok(())
}

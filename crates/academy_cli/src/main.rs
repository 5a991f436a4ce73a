//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `academy_core` linkage with deterministic output.
//! - Optionally open a database (`academy_cli <db-path> [config.toml]`) and
//!   report its schema version.

use academy_core::db::migrations::current_user_version;
use academy_core::db::open_db_with_config;
use academy_core::{init_logging_from_config, CoreConfig, SqliteRecordStore};
use log::info;
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("academy_core ping={}", academy_core::ping());
    println!("academy_core version={}", academy_core::core_version());

    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next() else {
        return ExitCode::SUCCESS;
    };

    match inspect_db(Path::new(&db_path), args.next().as_deref().map(Path::new)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("academy_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn inspect_db(db_path: &Path, config_path: Option<&Path>) -> Result<(), String> {
    let config = match config_path {
        Some(path) => CoreConfig::from_file(path).map_err(|err| err.to_string())?,
        None => CoreConfig::default(),
    };
    let logging_enabled =
        init_logging_from_config(&config.logging).map_err(|err| err.to_string())?;

    let conn = open_db_with_config(db_path, &config.db).map_err(|err| err.to_string())?;
    SqliteRecordStore::try_new(&conn).map_err(|err| err.to_string())?;
    let schema_version = current_user_version(&conn).map_err(|err| err.to_string())?;

    info!("event=cli_inspect module=cli status=ok schema_version={schema_version}");
    println!("academy_core schema_version={schema_version}");
    println!("academy_core logging={}", if logging_enabled { "on" } else { "off" });
    Ok(())
}

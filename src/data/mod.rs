pub mod job_repository;
pub mod media_repository;
pub mod migrations;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppError;

/// The single connection shared by the catalog and job stores.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn open_database(db_path: &Path) -> Result<SharedConnection, AppError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    migrations::run_migrations(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn open_in_memory() -> Result<SharedConnection, AppError> {
    let conn = Connection::open_in_memory()?;
    migrations::run_migrations(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("vault.db");

        let db = open_database(&db_path).unwrap();

        assert!(db_path.exists());
        let conn = db.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}

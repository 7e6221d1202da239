use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS media (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    path TEXT UNIQUE NOT NULL,
    filename TEXT NOT NULL,
    ext TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime_ms INTEGER NOT NULL,
    added_at_ms INTEGER NOT NULL,
    duration_ms INTEGER,
    width INTEGER,
    height INTEGER,
    thumb_path TEXT,
    content_hash TEXT,
    phash TEXT,
    analyze_error BOOLEAN NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_media_kind ON media(kind);
CREATE INDEX IF NOT EXISTS idx_media_added ON media(added_at_ms);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    media_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    priority INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    error TEXT,
    created_at_ms INTEGER NOT NULL,
    started_at_ms INTEGER,
    finished_at_ms INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(status, priority DESC, created_at_ms ASC, id ASC);
CREATE INDEX IF NOT EXISTS idx_jobs_media ON jobs(media_id, type);
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_one_queued ON jobs(media_id, type) WHERE status = 'queued';
";

/// Columns added after the first release. Each is applied only when missing so existing
/// vaults upgrade in place.
const MEDIA_COLUMNS_V2: &[(&str, &str)] = &[
    ("transcoded_path", "TEXT"),
    ("loudness_peak_ms", "INTEGER"),
];

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, AppError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect::<Vec<_>>();
    Ok(names.iter().any(|name| name == column))
}

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch(SCHEMA_V1)?;
    for (column, ty) in MEDIA_COLUMNS_V2 {
        if !has_column(conn, "media", column)? {
            conn.execute_batch(&format!("ALTER TABLE media ADD COLUMN {column} {ty};"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"media".to_string()));
        assert!(tables.contains(&"jobs".to_string()));
    }

    #[test]
    fn test_migration_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("vault.db");
        let conn = Connection::open(&db_path).unwrap();
        run_migrations(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap(); // should not error
    }

    #[test]
    fn test_migration_upgrades_v1_media_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_V1).unwrap();
        assert!(!has_column(&conn, "media", "loudness_peak_ms").unwrap());

        run_migrations(&conn).unwrap();

        assert!(has_column(&conn, "media", "transcoded_path").unwrap());
        assert!(has_column(&conn, "media", "loudness_peak_ms").unwrap());
    }

    #[test]
    fn test_only_one_queued_job_per_media_and_type() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let insert = "INSERT INTO jobs (type, media_id, status, payload, created_at_ms)
                      VALUES ('analyze', 'm-1', ?1, '{}', 0)";

        conn.execute(insert, ["queued"]).unwrap();
        conn.execute(insert, ["done"]).unwrap();
        assert!(conn.execute(insert, ["queued"]).is_err());
    }
}

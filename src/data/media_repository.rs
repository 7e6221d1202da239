use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::AppError;
use crate::models::media::{CatalogStats, DerivedFields, MediaKind, MediaRecord};

const MEDIA_COLUMNS: &str = "id, kind, path, filename, ext, size, mtime_ms, added_at_ms,
    duration_ms, width, height, thumb_path, content_hash, phash, transcoded_path,
    loudness_peak_ms, analyze_error";

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    let kind: String = row.get(1)?;
    let kind = kind
        .parse::<MediaKind>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(1, "kind".to_string(), Type::Text))?;

    Ok(MediaRecord {
        id: row.get(0)?,
        kind,
        path: row.get(2)?,
        filename: row.get(3)?,
        ext: row.get(4)?,
        size: row.get(5)?,
        mtime_ms: row.get(6)?,
        added_at_ms: row.get(7)?,
        duration_ms: row.get(8)?,
        width: row.get(9)?,
        height: row.get(10)?,
        thumb_path: row.get(11)?,
        content_hash: row.get(12)?,
        phash: row.get(13)?,
        transcoded_path: row.get(14)?,
        loudness_peak_ms: row.get(15)?,
        analyze_error: row.get(16)?,
    })
}

/// Insert-or-update keyed by path. On conflict the stored `id` and `added_at_ms` win.
pub fn upsert_media(conn: &Connection, record: &MediaRecord) -> Result<MediaRecord, AppError> {
    conn.execute(
        "INSERT INTO media (id, kind, path, filename, ext, size, mtime_ms, added_at_ms,
             duration_ms, width, height, thumb_path, content_hash, phash, transcoded_path,
             loudness_peak_ms, analyze_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT(path) DO UPDATE SET
             kind = excluded.kind,
             filename = excluded.filename,
             ext = excluded.ext,
             size = excluded.size,
             mtime_ms = excluded.mtime_ms,
             duration_ms = excluded.duration_ms,
             width = excluded.width,
             height = excluded.height,
             thumb_path = excluded.thumb_path,
             content_hash = excluded.content_hash,
             phash = excluded.phash,
             transcoded_path = excluded.transcoded_path,
             loudness_peak_ms = excluded.loudness_peak_ms,
             analyze_error = excluded.analyze_error",
        params![
            record.id,
            record.kind.to_string(),
            record.path,
            record.filename,
            record.ext,
            record.size,
            record.mtime_ms,
            record.added_at_ms,
            record.duration_ms,
            record.width,
            record.height,
            record.thumb_path,
            record.content_hash,
            record.phash,
            record.transcoded_path,
            record.loudness_peak_ms,
            record.analyze_error,
        ],
    )?;

    get_by_path(conn, &record.path)?
        .ok_or_else(|| AppError::General(format!("upsert lost row for {}", record.path)))
}

pub fn get_by_path(conn: &Connection, path: &str) -> Result<Option<MediaRecord>, AppError> {
    let record = conn
        .query_row(
            &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE path = ?1"),
            params![path],
            media_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<MediaRecord>, AppError> {
    let record = conn
        .query_row(
            &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?1"),
            params![id],
            media_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn list_all(conn: &Connection) -> Result<Vec<MediaRecord>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEDIA_COLUMNS} FROM media ORDER BY added_at_ms ASC, rowid ASC"
    ))?;
    let records = stmt
        .query_map([], media_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

pub fn list_all_paths(conn: &Connection) -> Result<Vec<(String, String)>, AppError> {
    let mut stmt = conn.prepare("SELECT id, path FROM media ORDER BY path")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Rows in creation order, oldest first. Ties on `added_at_ms` fall back to insertion order.
pub fn list_for_dedupe(conn: &Connection) -> Result<Vec<(String, String)>, AppError> {
    let mut stmt =
        conn.prepare("SELECT id, path FROM media ORDER BY added_at_ms ASC, rowid ASC")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn delete_by_id(conn: &Connection, id: &str) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM media WHERE id = ?1", params![id])?;
    Ok(count)
}

pub fn clear_thumb_path(conn: &Connection, id: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE media SET thumb_path = NULL WHERE id = ?1",
        params![id],
    )?;
    Ok(count)
}

pub fn set_analyze_error(conn: &Connection, id: &str, failed: bool) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE media SET analyze_error = ?2 WHERE id = ?1",
        params![id, failed],
    )?;
    Ok(count)
}

pub fn clear_all_analyze_errors(conn: &Connection) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE media SET analyze_error = 0 WHERE analyze_error != 0",
        [],
    )?;
    Ok(count)
}

pub fn update_derived(
    conn: &Connection,
    id: &str,
    patch: &DerivedFields,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE media SET
             duration_ms = COALESCE(?2, duration_ms),
             width = COALESCE(?3, width),
             height = COALESCE(?4, height),
             thumb_path = COALESCE(?5, thumb_path),
             content_hash = COALESCE(?6, content_hash),
             phash = COALESCE(?7, phash),
             transcoded_path = COALESCE(?8, transcoded_path),
             loudness_peak_ms = COALESCE(?9, loudness_peak_ms)
         WHERE id = ?1",
        params![
            id,
            patch.duration_ms,
            patch.width,
            patch.height,
            patch.thumb_path,
            patch.content_hash,
            patch.phash,
            patch.transcoded_path,
            patch.loudness_peak_ms,
        ],
    )?;
    Ok(count)
}

pub fn stats(conn: &Connection) -> Result<CatalogStats, AppError> {
    let mut stmt = conn.prepare(
        "SELECT kind, COUNT(*), SUM(CASE WHEN analyze_error != 0 THEN 1 ELSE 0 END)
         FROM media GROUP BY kind",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stats = CatalogStats::default();
    for (kind, count, failed) in rows {
        let count = count as usize;
        match kind.parse::<MediaKind>() {
            Ok(MediaKind::Video) => stats.videos += count,
            Ok(MediaKind::Image) => stats.images += count,
            Ok(MediaKind::Gif) => stats.gifs += count,
            Err(_) => {}
        }
        stats.total += count;
        stats.failed += failed as usize;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::migrations::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn sample_media(id: &str, path: &str) -> MediaRecord {
        MediaRecord {
            id: id.to_string(),
            kind: MediaKind::Video,
            path: path.to_string(),
            filename: "clip.mp4".to_string(),
            ext: "mp4".to_string(),
            size: 1024,
            mtime_ms: 1_000,
            added_at_ms: 10,
            duration_ms: None,
            width: None,
            height: None,
            thumb_path: None,
            content_hash: None,
            phash: None,
            transcoded_path: None,
            loudness_peak_ms: None,
            analyze_error: false,
        }
    }

    #[test]
    fn test_media_crud() {
        let conn = setup_db();
        let record = sample_media("m-1", "/vault/clip.mp4");

        let stored = upsert_media(&conn, &record).unwrap();
        assert_eq!(stored, record);

        let by_id = get_by_id(&conn, "m-1").unwrap().unwrap();
        assert_eq!(by_id.path, "/vault/clip.mp4");

        assert_eq!(
            list_all_paths(&conn).unwrap(),
            vec![("m-1".to_string(), "/vault/clip.mp4".to_string())]
        );

        assert_eq!(delete_by_id(&conn, "m-1").unwrap(), 1);
        assert!(get_by_path(&conn, "/vault/clip.mp4").unwrap().is_none());
    }

    #[test]
    fn test_upsert_keeps_identity_and_added_at() {
        let conn = setup_db();
        upsert_media(&conn, &sample_media("m-1", "/vault/clip.mp4")).unwrap();

        let mut changed = sample_media("m-other", "/vault/clip.mp4");
        changed.size = 4096;
        changed.added_at_ms = 999;
        let stored = upsert_media(&conn, &changed).unwrap();

        assert_eq!(stored.id, "m-1");
        assert_eq!(stored.added_at_ms, 10);
        assert_eq!(stored.size, 4096);
    }

    #[test]
    fn test_update_derived_only_touches_given_fields() {
        let conn = setup_db();
        let mut record = sample_media("m-1", "/vault/clip.mp4");
        record.width = Some(1920);
        upsert_media(&conn, &record).unwrap();

        let patch = DerivedFields {
            duration_ms: Some(5_000),
            thumb_path: Some("/cache/m-1.jpg".to_string()),
            ..Default::default()
        };
        assert_eq!(update_derived(&conn, "m-1", &patch).unwrap(), 1);

        let stored = get_by_id(&conn, "m-1").unwrap().unwrap();
        assert_eq!(stored.duration_ms, Some(5_000));
        assert_eq!(stored.width, Some(1920));
        assert_eq!(stored.thumb_path.as_deref(), Some("/cache/m-1.jpg"));
    }

    #[test]
    fn test_analyze_error_flag_toggles() {
        let conn = setup_db();
        upsert_media(&conn, &sample_media("m-1", "/vault/a.mp4")).unwrap();
        upsert_media(&conn, &sample_media("m-2", "/vault/b.mp4")).unwrap();

        set_analyze_error(&conn, "m-1", true).unwrap();
        set_analyze_error(&conn, "m-2", true).unwrap();
        assert!(get_by_id(&conn, "m-1").unwrap().unwrap().analyze_error);

        assert_eq!(clear_all_analyze_errors(&conn).unwrap(), 2);
        assert!(!get_by_id(&conn, "m-2").unwrap().unwrap().analyze_error);
    }

    #[test]
    fn test_stats_counts_kinds_and_failures() {
        let conn = setup_db();
        upsert_media(&conn, &sample_media("m-1", "/vault/a.mp4")).unwrap();
        let mut image = sample_media("m-2", "/vault/b.jpg");
        image.kind = MediaKind::Image;
        image.analyze_error = true;
        upsert_media(&conn, &image).unwrap();

        let stats = stats(&conn).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.videos, 1);
        assert_eq!(stats.images, 1);
        assert_eq!(stats.failed, 1);
    }
}

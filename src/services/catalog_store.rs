use std::collections::HashMap;
use std::path::Path;
use std::sync::MutexGuard;

use rusqlite::Connection;

use crate::data::{media_repository, SharedConnection};
use crate::error::AppError;
use crate::models::media::{CatalogStats, DerivedFields, MediaKind, MediaRecord};
use crate::scope_path;
use crate::services::notifier::{ChangeEvent, SharedNotifier};

/// Durable table of known media. The only writer of the `media` table.
#[derive(Clone)]
pub struct CatalogStore {
    db: SharedConnection,
    notifier: SharedNotifier,
}

pub fn thumb_exists(record: &MediaRecord) -> bool {
    record
        .thumb_path
        .as_deref()
        .map(|p| Path::new(p).is_file())
        .unwrap_or(false)
}

/// Whether the record still lacks the derived data its kind requires.
pub fn needs_analyze(record: &MediaRecord) -> bool {
    match record.kind {
        MediaKind::Video => record.duration_ms.is_none() || !thumb_exists(record),
        MediaKind::Image | MediaKind::Gif => !thumb_exists(record),
    }
}

impl CatalogStore {
    pub fn new(db: SharedConnection, notifier: SharedNotifier) -> Self {
        Self { db, notifier }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn changed(&self, count: usize) {
        if count > 0 {
            self.notifier.notify(ChangeEvent::CatalogChanged);
        }
    }

    pub fn get_by_path(&self, path: &str) -> Result<Option<MediaRecord>, AppError> {
        media_repository::get_by_path(&self.conn(), path)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<MediaRecord>, AppError> {
        media_repository::get_by_id(&self.conn(), id)
    }

    pub fn upsert(&self, record: &MediaRecord) -> Result<MediaRecord, AppError> {
        let stored = media_repository::upsert_media(&self.conn(), record)?;
        self.changed(1);
        Ok(stored)
    }

    pub fn needs_analyze(&self, record: &MediaRecord) -> bool {
        needs_analyze(record)
    }

    pub fn clear_thumb_path(&self, id: &str) -> Result<(), AppError> {
        let count = media_repository::clear_thumb_path(&self.conn(), id)?;
        self.changed(count);
        Ok(())
    }

    pub fn clear_analyze_error_flag(&self, id: &str) -> Result<(), AppError> {
        let count = media_repository::set_analyze_error(&self.conn(), id, false)?;
        self.changed(count);
        Ok(())
    }

    pub fn set_analyze_error_flag(&self, id: &str) -> Result<(), AppError> {
        let count = media_repository::set_analyze_error(&self.conn(), id, true)?;
        self.changed(count);
        Ok(())
    }

    pub fn clear_all_analyze_error_flags(&self) -> Result<usize, AppError> {
        let count = media_repository::clear_all_analyze_errors(&self.conn())?;
        self.changed(count);
        Ok(count)
    }

    pub fn update_derived(&self, id: &str, patch: &DerivedFields) -> Result<(), AppError> {
        if patch.is_empty() {
            return Ok(());
        }
        let count = media_repository::update_derived(&self.conn(), id, patch)?;
        self.changed(count);
        Ok(())
    }

    pub fn list_all_paths(&self) -> Result<Vec<(String, String)>, AppError> {
        media_repository::list_all_paths(&self.conn())
    }

    pub fn list_all(&self) -> Result<Vec<MediaRecord>, AppError> {
        media_repository::list_all(&self.conn())
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool, AppError> {
        let count = media_repository::delete_by_id(&self.conn(), id)?;
        self.changed(count);
        Ok(count > 0)
    }

    /// Deletes the record for `path`, returning its id.
    pub fn delete_by_path(&self, path: &str) -> Result<Option<String>, AppError> {
        let removed = {
            let conn = self.conn();
            match media_repository::get_by_path(&conn, path)? {
                Some(record) => {
                    media_repository::delete_by_id(&conn, &record.id)?;
                    Some(record.id)
                }
                None => None,
            }
        };
        self.changed(usize::from(removed.is_some()));
        Ok(removed)
    }

    /// Deletes every record located under directory `dir`, returning their ids.
    pub fn delete_under(&self, dir: &str) -> Result<Vec<String>, AppError> {
        let removed = {
            let conn = self.conn();
            let doomed: Vec<String> = media_repository::list_all_paths(&conn)?
                .into_iter()
                .filter(|(_, path)| scope_path::is_within_scope(path, dir))
                .map(|(id, _)| id)
                .collect();
            for id in &doomed {
                media_repository::delete_by_id(&conn, id)?;
            }
            doomed
        };
        self.changed(removed.len());
        Ok(removed)
    }

    /// Collapses records whose paths are spellings of the same file onto the earliest-created
    /// one. Returns the ids that were deleted.
    pub fn deduplicate_by_normalized_path(&self) -> Result<Vec<String>, AppError> {
        let removed = {
            let conn = self.conn();
            let mut kept: HashMap<String, Vec<String>> = HashMap::new();
            let mut duplicates = Vec::new();
            for (id, path) in media_repository::list_for_dedupe(&conn)? {
                let spellings = kept.entry(scope_path::dedupe_key(&path)).or_default();
                // a key collision between two real files on disk is not a duplicate
                if spellings
                    .iter()
                    .all(|earlier| scope_path::are_distinct_files(earlier, &path))
                {
                    spellings.push(path);
                } else {
                    duplicates.push(id);
                }
            }
            for id in &duplicates {
                media_repository::delete_by_id(&conn, id)?;
            }
            duplicates
        };
        self.changed(removed.len());
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CatalogStats, AppError> {
        media_repository::stats(&self.conn())
    }
}

use std::path::Path;

use crate::data::now_millis;
use crate::error::AppError;
use crate::models::job::{EnqueueOutcome, JobPayload, MediaSnapshot, WorkType};
use crate::models::media::MediaRecord;
use crate::services::catalog_store::{needs_analyze, thumb_exists, CatalogStore};
use crate::services::classifier;
use crate::services::job_store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not a media file.
    Skipped,
    Unchanged { enqueued: bool },
    Upserted { created: bool, enqueued: bool },
}

impl IngestOutcome {
    pub fn enqueued(self) -> bool {
        match self {
            Self::Skipped => false,
            Self::Unchanged { enqueued } | Self::Upserted { enqueued, .. } => enqueued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: i64,
    pub mtime_ms: i64,
}

pub fn stat_file(path: &Path) -> Result<FileStat, AppError> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(AppError::General(format!(
            "not a regular file: {}",
            path.display()
        )));
    }
    let mtime_ms = chrono::DateTime::<chrono::Utc>::from(metadata.modified()?).timestamp_millis();
    Ok(FileStat {
        size: metadata.len() as i64,
        mtime_ms,
    })
}

fn snapshot_of(record: &MediaRecord) -> MediaSnapshot {
    MediaSnapshot {
        media_id: record.id.clone(),
        path: record.path.clone(),
        size: record.size,
        mtime_ms: record.mtime_ms,
    }
}

fn analysis_payload(record: &MediaRecord) -> JobPayload {
    JobPayload::Analyze(snapshot_of(record))
}

/// The per-file decision shared by the scanner and the watcher: upsert when new or changed,
/// schedule analysis when derived data is missing.
#[derive(Clone)]
pub struct Ingestor {
    catalog: CatalogStore,
    jobs: JobStore,
}

impl Ingestor {
    pub fn new(catalog: CatalogStore, jobs: JobStore) -> Self {
        Self { catalog, jobs }
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn ingest_one(&self, path: &Path) -> Result<IngestOutcome, AppError> {
        let Some(class) = classifier::classify(path) else {
            return Ok(IngestOutcome::Skipped);
        };

        let stat = stat_file(path)?;
        let path_str = path.to_string_lossy().to_string();
        let existing = self.catalog.get_by_path(&path_str)?;

        if let Some(record) = &existing {
            if record.size == stat.size && record.mtime_ms == stat.mtime_ms {
                let mut enqueued = false;
                if needs_analyze(record) && !record.analyze_error {
                    if record.thumb_path.is_some() && !thumb_exists(record) {
                        self.catalog.clear_thumb_path(&record.id)?;
                    }
                    // an identical snapshot already being analyzed needs no second job
                    let payload = analysis_payload(record);
                    if !self.jobs.has_queued(&record.id, WorkType::Analyze)?
                        && !self.jobs.is_running_with(&payload)?
                    {
                        self.enqueue_analysis(record, &payload)?;
                        enqueued = true;
                    }
                }
                return Ok(IngestOutcome::Unchanged { enqueued });
            }
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path_str.clone());
        let mut record = MediaRecord {
            id: uuid::Uuid::new_v4().to_string(),
            kind: class.kind,
            path: path_str,
            filename,
            ext: class.ext,
            size: stat.size,
            mtime_ms: stat.mtime_ms,
            added_at_ms: now_millis(),
            duration_ms: None,
            width: None,
            height: None,
            thumb_path: None,
            content_hash: None,
            phash: None,
            transcoded_path: None,
            loudness_peak_ms: None,
            analyze_error: false,
        };
        if let Some(previous) = &existing {
            record.id = previous.id.clone();
            record.added_at_ms = previous.added_at_ms;
            record.carry_derived_from(previous);
        }

        let stored = self.catalog.upsert(&record)?;
        let outcome = self.enqueue_analysis(&stored, &analysis_payload(&stored))?;
        Ok(IngestOutcome::Upserted {
            created: existing.is_none(),
            enqueued: matches!(outcome, EnqueueOutcome::Inserted(_)),
        })
    }

    fn enqueue_analysis(
        &self,
        record: &MediaRecord,
        payload: &JobPayload,
    ) -> Result<EnqueueOutcome, AppError> {
        let outcome = self.jobs.enqueue(payload, record.kind.analyze_priority())?;
        tracing::debug!(media_id = %record.id, path = %record.path, ?outcome, "analysis scheduled");
        Ok(outcome)
    }

    /// Deletes a record and cancels whatever work was still queued for it.
    pub fn remove_record(&self, id: &str) -> Result<bool, AppError> {
        let removed = self.catalog.delete_by_id(id)?;
        if removed {
            self.jobs.cancel_queued_for_media(id)?;
        }
        Ok(removed)
    }

    /// Handles a path that disappeared from disk: a file's record, or every record under a
    /// vanished directory.
    pub fn remove_path(&self, path: &Path) -> Result<usize, AppError> {
        let path_str = path.to_string_lossy().to_string();
        let removed = match self.catalog.delete_by_path(&path_str)? {
            Some(id) => vec![id],
            None => self.catalog.delete_under(&path_str)?,
        };
        for id in &removed {
            self.jobs.cancel_queued_for_media(id)?;
        }
        Ok(removed.len())
    }
}

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AppError;
use crate::scope_path;
use crate::services::classifier;
use crate::services::ingest::{IngestOutcome, Ingestor};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub visited: usize,
    pub media: usize,
    pub skipped_non_media: usize,
    pub upserted: usize,
    pub enqueued: usize,
    pub failed: usize,
}

impl ScanReport {
    pub fn merge(&mut self, other: &ScanReport) {
        self.visited += other.visited;
        self.media += other.media;
        self.skipped_non_media += other.skipped_non_media;
        self.upserted += other.upserted;
        self.enqueued += other.enqueued;
        self.failed += other.failed;
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Recursive walk of `root` following symlinks and skipping hidden entries.
pub fn walk_media_tree(root: &Path) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
    walkdir::WalkDir::new(root)
        .follow_links(true)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
}

#[derive(Clone)]
pub struct Scanner {
    ingestor: Ingestor,
}

impl Scanner {
    pub fn new(ingestor: Ingestor) -> Self {
        Self { ingestor }
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn scan_root(&self, root: &Path) -> ScanReport {
        let mut report = ScanReport::default();
        if !root.is_dir() {
            tracing::warn!(root = %root.display(), "media root is not a directory, skipping scan");
            return report;
        }

        for entry in walk_media_tree(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(root = %root.display(), error = %err, "walk error");
                    report.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            report.visited += 1;
            self.ingest_entry(entry.path(), &mut report);
        }

        tracing::info!(
            root = %root.display(),
            visited = report.visited,
            media = report.media,
            skipped = report.skipped_non_media,
            upserted = report.upserted,
            enqueued = report.enqueued,
            failed = report.failed,
            "scan finished"
        );
        report
    }

    fn ingest_entry(&self, path: &Path, report: &mut ScanReport) {
        if classifier::classify(path).is_none() {
            report.skipped_non_media += 1;
            return;
        }
        report.media += 1;
        match self.ingestor.ingest_one(path) {
            Ok(IngestOutcome::Skipped) => report.skipped_non_media += 1,
            Ok(outcome) => {
                if matches!(outcome, IngestOutcome::Upserted { .. }) {
                    report.upserted += 1;
                }
                if outcome.enqueued() {
                    report.enqueued += 1;
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to ingest file");
                report.failed += 1;
            }
        }
    }

    /// Scans every root, then collapses path-spelling duplicates.
    pub fn scan_roots(&self, roots: &[PathBuf]) -> ScanReport {
        let mut report = ScanReport::default();
        for root in roots {
            report.merge(&self.scan_root(root));
        }
        match self.ingestor.catalog().deduplicate_by_normalized_path() {
            Ok(removed) => {
                for id in &removed {
                    if let Err(err) = self.ingestor.jobs().cancel_queued_for_media(id) {
                        tracing::warn!(media_id = %id, error = %err, "failed to cancel jobs of duplicate");
                    }
                }
                if !removed.is_empty() {
                    tracing::info!(removed = removed.len(), "collapsed duplicate catalog paths");
                }
            }
            Err(err) => tracing::warn!(error = %err, "deduplication failed"),
        }
        report
    }

    /// Fresh full rescan: clears every sticky failure flag so previously failed files get
    /// another analysis attempt.
    pub fn full_rescan(&self, roots: &[PathBuf]) -> Result<ScanReport, AppError> {
        let cleared = self.ingestor.catalog().clear_all_analyze_error_flags()?;
        if cleared > 0 {
            tracing::info!(cleared, "cleared sticky analysis failures for full rescan");
        }
        Ok(self.scan_roots(roots))
    }

    /// Removes records whose file is gone, and with `roots`, records outside all of them.
    pub fn cleanup(&self, roots: Option<&[PathBuf]>) -> Result<usize, AppError> {
        let mut removed = 0usize;
        for (id, path) in self.ingestor.catalog().list_all_paths()? {
            let outside = roots
                .map(|roots| !scope_path::is_under_any_root(&path, roots))
                .unwrap_or(false);
            let missing = !Path::new(&path).is_file();
            if (outside || missing) && self.ingestor.remove_record(&id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "catalog cleanup removed stale records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data;
    use crate::models::job::{JobFilter, JobStatus};
    use crate::models::media::DerivedFields;
    use crate::services::catalog_store::CatalogStore;
    use crate::services::job_store::JobStore;
    use crate::services::notifier::NoopNotifier;
    use std::fs;
    use std::sync::Arc;

    fn scanner() -> Scanner {
        let db = data::open_in_memory().unwrap();
        let notifier = Arc::new(NoopNotifier);
        Scanner::new(Ingestor::new(
            CatalogStore::new(db.clone(), notifier.clone()),
            JobStore::new(db, notifier),
        ))
    }

    fn queued_count(scanner: &Scanner) -> usize {
        scanner.ingestor().jobs().counts().unwrap().queued
    }

    /// Plays the analyzer: drains the queue and writes complete derived data.
    fn complete_all(scanner: &Scanner, thumbs: &Path) {
        let jobs = scanner.ingestor().jobs();
        while let Some(job) = jobs.dequeue_next().unwrap() {
            let thumb = thumbs.join(format!("{}.jpg", job.media_id));
            fs::write(&thumb, b"thumb").unwrap();
            scanner
                .ingestor()
                .catalog()
                .update_derived(
                    &job.media_id,
                    &DerivedFields {
                        duration_ms: Some(1_000),
                        thumb_path: Some(thumb.to_string_lossy().to_string()),
                        ..Default::default()
                    },
                )
                .unwrap();
            jobs.mark_done(job.id).unwrap();
        }
    }

    #[test]
    fn test_scan_indexes_media_and_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join("clip.mp4"), b"v").unwrap();
        fs::write(root.join("sub/photo.jpg"), b"i").unwrap();
        fs::write(root.join("notes.txt"), b"t").unwrap();
        fs::write(root.join(".secret.mp4"), b"h").unwrap();
        fs::write(root.join(".hidden/inside.gif"), b"h").unwrap();

        let scanner = scanner();
        let report = scanner.scan_root(root);

        assert_eq!(report.media, 2);
        assert_eq!(report.skipped_non_media, 1);
        assert_eq!(report.upserted, 2);
        assert_eq!(report.enqueued, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(scanner.ingestor().catalog().list_all_paths().unwrap().len(), 2);
    }

    #[test]
    fn test_scan_unchanged_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clip.mp4"), b"v").unwrap();
        fs::write(dir.path().join("photo.jpg"), b"i").unwrap();

        let scanner = scanner();
        scanner.scan_root(dir.path());
        complete_all(&scanner, thumbs.path());
        let total_jobs = scanner.ingestor().jobs().list(&JobFilter::default()).unwrap().len();

        let report = scanner.scan_root(dir.path());

        assert_eq!(report.upserted, 0);
        assert_eq!(report.enqueued, 0);
        assert_eq!(
            scanner.ingestor().jobs().list(&JobFilter::default()).unwrap().len(),
            total_jobs
        );
    }

    #[test]
    fn test_changed_file_gets_exactly_one_new_job() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        fs::write(&clip, b"v1").unwrap();

        let scanner = scanner();
        scanner.scan_root(dir.path());
        complete_all(&scanner, thumbs.path());

        fs::write(&clip, b"v2 is longer").unwrap();
        scanner.scan_root(dir.path());
        scanner.scan_root(dir.path());

        let queued = scanner
            .ingestor()
            .jobs()
            .list(&JobFilter {
                status: Some(JobStatus::Queued),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].decode_payload().unwrap().snapshot().size, 12);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_case_distinct_files_are_both_kept() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Clip.mp4"), b"upper").unwrap();
        fs::write(dir.path().join("clip.mp4"), b"lower").unwrap();
        let roots = vec![dir.path().to_path_buf()];

        let scanner = scanner();
        let first = scanner.scan_roots(&roots);
        assert_eq!(first.upserted, 2);
        assert_eq!(scanner.ingestor().catalog().list_all_paths().unwrap().len(), 2);
        assert_eq!(queued_count(&scanner), 2);
        complete_all(&scanner, thumbs.path());

        let second = scanner.scan_roots(&roots);

        assert_eq!(second.upserted, 0);
        assert_eq!(second.enqueued, 0);
        assert_eq!(scanner.ingestor().catalog().list_all_paths().unwrap().len(), 2);
        assert_eq!(scanner.ingestor().jobs().counts().unwrap().canceled, 0);
    }

    #[test]
    fn test_sticky_failure_survives_scans_until_full_rescan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.mp4"), b"not really a video").unwrap();
        let roots = vec![dir.path().to_path_buf()];

        let scanner = scanner();
        scanner.scan_roots(&roots);
        let job = scanner.ingestor().jobs().dequeue_next().unwrap().unwrap();
        scanner.ingestor().jobs().mark_error(job.id, "moov atom not found").unwrap();
        scanner.ingestor().catalog().set_analyze_error_flag(&job.media_id).unwrap();

        for _ in 0..3 {
            assert_eq!(scanner.scan_roots(&roots).enqueued, 0);
        }
        assert_eq!(queued_count(&scanner), 0);

        let report = scanner.full_rescan(&roots).unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(queued_count(&scanner), 1);
    }

    #[test]
    fn test_cleanup_removes_only_the_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.mp4"), b"k").unwrap();
        fs::write(dir.path().join("drop.mp4"), b"d").unwrap();
        let scanner = scanner();
        scanner.scan_root(dir.path());

        fs::remove_file(dir.path().join("drop.mp4")).unwrap();
        let removed = scanner.cleanup(None).unwrap();

        assert_eq!(removed, 1);
        let paths = scanner.ingestor().catalog().list_all_paths().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].1.ends_with("keep.mp4"));
        assert_eq!(queued_count(&scanner), 1);
    }

    #[test]
    fn test_cleanup_removes_records_of_dropped_root() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("one.mp4"), b"1").unwrap();
        fs::write(b.path().join("two.jpg"), b"2").unwrap();
        fs::write(b.path().join("three.gif"), b"3").unwrap();
        let scanner = scanner();
        scanner.scan_roots(&[a.path().to_path_buf(), b.path().to_path_buf()]);

        let removed = scanner.cleanup(Some(&[a.path().to_path_buf()])).unwrap();

        assert_eq!(removed, 2);
        let paths = scanner.ingestor().catalog().list_all_paths().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].1.ends_with("one.mp4"));
    }

    #[test]
    fn test_missing_root_yields_empty_report() {
        let scanner = scanner();
        let report = scanner.scan_root(Path::new("/nonexistent/media_vault_root_xyz"));
        assert_eq!(report, ScanReport::default());
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_follows_symlinked_directories() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        fs::write(elsewhere.path().join("linked.webm"), b"w").unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), dir.path().join("link")).unwrap();

        let scanner = scanner();
        let report = scanner.scan_root(dir.path());

        assert_eq!(report.media, 1);
        let path = dir.path().join("link").join("linked.webm");
        assert!(scanner
            .ingestor()
            .catalog()
            .get_by_path(&path.to_string_lossy())
            .unwrap()
            .is_some());
    }
}

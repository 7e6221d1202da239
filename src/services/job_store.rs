use std::sync::{Arc, MutexGuard};

use rusqlite::Connection;
use tokio::sync::Notify;

use crate::data::{job_repository, now_millis, SharedConnection};
use crate::error::AppError;
use crate::models::job::{EnqueueOutcome, Job, JobCounts, JobFilter, JobPayload, WorkType};
use crate::services::notifier::{ChangeEvent, SharedNotifier};

/// Durable priority queue of analysis work. The only writer of the `jobs` table.
#[derive(Clone)]
pub struct JobStore {
    db: SharedConnection,
    notifier: SharedNotifier,
    wakeup: Arc<Notify>,
}

impl JobStore {
    pub fn new(db: SharedConnection, notifier: SharedNotifier) -> Self {
        Self {
            db,
            notifier,
            wakeup: Arc::new(Notify::new()),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn changed(&self, count: usize) {
        if count > 0 {
            self.notifier.notify(ChangeEvent::JobsChanged);
        }
    }

    /// Signal the runner waits on. Fired by every enqueue.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    pub fn enqueue(&self, payload: &JobPayload, priority: i64) -> Result<EnqueueOutcome, AppError> {
        let outcome = job_repository::enqueue(&self.conn(), payload, priority, now_millis())?;
        self.changed(1);
        self.wakeup.notify_one();
        Ok(outcome)
    }

    pub fn has_queued(&self, media_id: &str, work_type: WorkType) -> Result<bool, AppError> {
        job_repository::has_queued(&self.conn(), media_id, work_type)
    }

    pub fn is_running_with(&self, payload: &JobPayload) -> Result<bool, AppError> {
        job_repository::is_running_with(&self.conn(), payload)
    }

    pub fn dequeue_next(&self) -> Result<Option<Job>, AppError> {
        let job = job_repository::dequeue_next(&self.conn(), now_millis())?;
        self.changed(usize::from(job.is_some()));
        Ok(job)
    }

    pub fn get(&self, id: i64) -> Result<Option<Job>, AppError> {
        job_repository::get_job(&self.conn(), id)
    }

    pub fn mark_done(&self, id: i64) -> Result<(), AppError> {
        let count = job_repository::mark_done(&self.conn(), id, now_millis())?;
        self.changed(count);
        Ok(())
    }

    pub fn mark_error(&self, id: i64, message: &str) -> Result<(), AppError> {
        let count = job_repository::mark_error(&self.conn(), id, message, now_millis())?;
        self.changed(count);
        Ok(())
    }

    pub fn mark_canceled(&self, id: i64) -> Result<(), AppError> {
        let count = job_repository::mark_canceled(&self.conn(), id, now_millis())?;
        self.changed(count);
        Ok(())
    }

    pub fn cancel_queued_for_media(&self, media_id: &str) -> Result<usize, AppError> {
        let count = job_repository::cancel_queued_for_media(&self.conn(), media_id, now_millis())?;
        self.changed(count);
        Ok(count)
    }

    pub fn requeue_interrupted(&self) -> Result<usize, AppError> {
        let count = job_repository::requeue_interrupted(&self.conn(), now_millis())?;
        self.changed(count);
        if count > 0 {
            self.wakeup.notify_one();
        }
        Ok(count)
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, AppError> {
        job_repository::list_jobs(&self.conn(), filter)
    }

    pub fn counts(&self) -> Result<JobCounts, AppError> {
        job_repository::counts(&self.conn())
    }

    pub fn prune_finished(&self, older_than_ms: i64) -> Result<usize, AppError> {
        let count = job_repository::prune_finished(&self.conn(), older_than_ms)?;
        self.changed(count);
        Ok(count)
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::config::RunnerConfig;
use crate::error::{AppError, HandlerError};
use crate::models::job::{Job, JobPayload, WorkType};
use crate::services::catalog_store::CatalogStore;
use crate::services::job_store::JobStore;

/// Contract for whoever performs the expensive work (probing, thumbnailing, loudness).
/// Handlers write their results back through `catalog.update_derived`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, catalog: &CatalogStore, payload: &JobPayload) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Done,
    Superseded,
    Failed,
    NoHandler,
}

struct Shared {
    catalog: CatalogStore,
    jobs: JobStore,
    handlers: RwLock<HashMap<WorkType, Arc<dyn JobHandler>>>,
    slots: Arc<Semaphore>,
    concurrency: usize,
    idle_recheck: Duration,
    stopping: AtomicBool,
    wakeup: Arc<Notify>,
}

/// Pulls jobs off the queue and runs them on at most `concurrency` tasks.
pub struct JobRunner {
    shared: Arc<Shared>,
    main_loop: Mutex<Option<JoinHandle<()>>>,
}

impl JobRunner {
    pub fn new(catalog: CatalogStore, jobs: JobStore, config: &RunnerConfig) -> Self {
        let concurrency = config.effective_concurrency();
        let wakeup = jobs.wakeup();
        Self {
            shared: Arc::new(Shared {
                catalog,
                jobs,
                handlers: RwLock::new(HashMap::new()),
                slots: Arc::new(Semaphore::new(concurrency)),
                concurrency,
                idle_recheck: config.idle_recheck(),
                stopping: AtomicBool::new(false),
                wakeup,
            }),
            main_loop: Mutex::new(None),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }

    pub fn register_handler(&self, work_type: WorkType, handler: Arc<dyn JobHandler>) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(work_type, handler);
    }

    pub fn is_running(&self) -> bool {
        self.main_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawns the dispatch loop on the current tokio runtime. Returns false when it is
    /// already running.
    pub fn start(&self) -> bool {
        let mut main_loop = self
            .main_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if main_loop.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        self.shared.stopping.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        *main_loop = Some(tokio::spawn(run_loop(shared)));
        tracing::info!(concurrency = self.shared.concurrency, "job runner started");
        true
    }

    pub fn poke(&self) {
        self.shared.wakeup.notify_one();
    }

    /// Stops dequeuing and waits for in-flight jobs to finish.
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();

        let handle = self
            .main_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "job runner loop ended abnormally");
            }
        }

        // every slot back means nothing is in flight
        match self.shared.slots.acquire_many(self.shared.concurrency as u32).await {
            Ok(all) => drop(all),
            Err(err) => tracing::warn!(error = %err, "job runner slots closed"),
        }
        tracing::info!("job runner stopped");
    }

    /// Dequeues and dispatches a single job on the caller's task.
    pub async fn run_once(&self) -> Result<Option<DispatchOutcome>, AppError> {
        match self.shared.jobs.dequeue_next()? {
            Some(job) => Ok(Some(supervise(self.shared.clone(), job).await)),
            None => Ok(None),
        }
    }
}

async fn run_loop(shared: Arc<Shared>) {
    loop {
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }
        let slot = match shared.slots.clone().acquire_owned().await {
            Ok(slot) => slot,
            Err(_) => break,
        };
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }

        match shared.jobs.dequeue_next() {
            Ok(Some(job)) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    supervise(shared, job).await;
                    drop(slot);
                });
            }
            Ok(None) => {
                drop(slot);
                wait_for_work(&shared).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to dequeue job");
                drop(slot);
                wait_for_work(&shared).await;
            }
        }
    }
    tracing::debug!("job runner loop exited");
}

async fn wait_for_work(shared: &Shared) {
    tokio::select! {
        _ = shared.wakeup.notified() => {}
        _ = tokio::time::sleep(shared.idle_recheck) => {}
    }
}

fn settle(job_id: i64, result: Result<(), AppError>) {
    if let Err(err) = result {
        tracing::warn!(job_id, error = %err, "failed to record job result");
    }
}

fn lookup_handler(shared: &Shared, work_type: WorkType) -> Option<Arc<dyn JobHandler>> {
    shared
        .handlers
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&work_type)
        .cloned()
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `dispatch` on its own task so a panicking handler still leaves the job finished.
async fn supervise(shared: Arc<Shared>, job: Job) -> DispatchOutcome {
    let job_id = job.id;
    let task = tokio::spawn({
        let shared = shared.clone();
        async move { dispatch(&shared, job).await }
    });
    match task.await {
        Ok(outcome) => outcome,
        Err(err) => {
            let message = if err.is_panic() {
                format!("handler panicked: {}", panic_message(err.into_panic()))
            } else {
                "handler task was cancelled".to_string()
            };
            tracing::error!(job_id, "{message}");
            settle(job_id, shared.jobs.mark_error(job_id, &message));
            DispatchOutcome::Failed
        }
    }
}

fn no_handler(shared: &Shared, job: &Job) -> DispatchOutcome {
    let message = format!("no handler registered for work type {}", job.work_type);
    tracing::warn!(job_id = job.id, "{message}");
    settle(job.id, shared.jobs.mark_error(job.id, &message));
    DispatchOutcome::NoHandler
}

async fn dispatch(shared: &Shared, job: Job) -> DispatchOutcome {
    let work_type = job.work_type.parse::<WorkType>().ok();
    let payload = match job.decode_payload() {
        Ok(payload) => payload,
        Err(_) if work_type.is_none() => return no_handler(shared, &job),
        Err(err) => {
            settle(
                job.id,
                shared.jobs.mark_error(job.id, &format!("undecodable payload: {err}")),
            );
            return DispatchOutcome::Failed;
        }
    };

    let snapshot = payload.snapshot();
    let current = match shared.catalog.get_by_id(&snapshot.media_id) {
        Ok(current) => current,
        Err(err) => {
            settle(job.id, shared.jobs.mark_error(job.id, &err.to_string()));
            return DispatchOutcome::Failed;
        }
    };
    let fresh = current.is_some_and(|record| {
        record.path == snapshot.path
            && record.size == snapshot.size
            && record.mtime_ms == snapshot.mtime_ms
    });
    if !fresh {
        tracing::debug!(job_id = job.id, media_id = %snapshot.media_id, "job superseded");
        settle(job.id, shared.jobs.mark_done(job.id));
        return DispatchOutcome::Superseded;
    }

    let Some(handler) = lookup_handler(shared, payload.work_type()) else {
        return no_handler(shared, &job);
    };

    tracing::debug!(job_id = job.id, work_type = %job.work_type, path = %snapshot.path, "dispatching job");
    match handler.handle(&shared.catalog, &payload).await {
        Ok(()) => {
            settle(job.id, shared.jobs.mark_done(job.id));
            DispatchOutcome::Done
        }
        Err(err) => {
            tracing::warn!(
                job_id = job.id,
                path = %snapshot.path,
                permanent = err.is_permanent(),
                error = %err,
                "job handler failed"
            );
            settle(job.id, shared.jobs.mark_error(job.id, &err.to_string()));
            if err.is_permanent() {
                settle(job.id, shared.catalog.set_analyze_error_flag(&snapshot.media_id));
            }
            DispatchOutcome::Failed
        }
    }
}

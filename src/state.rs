use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::config::VaultConfig;
use crate::data::{self, SharedConnection};
use crate::error::AppError;
use crate::models::job::WorkType;
use crate::services::catalog_store::CatalogStore;
use crate::services::ingest::Ingestor;
use crate::services::job_runner::{JobHandler, JobRunner};
use crate::services::job_store::JobStore;
use crate::services::notifier::SharedNotifier;
use crate::services::scanner::{ScanReport, Scanner};
use crate::services::watcher::WatchSet;

/// Everything the host application holds on to: stores, scanner, watchers and runner wired
/// over one database connection.
pub struct Vault {
    config: RwLock<VaultConfig>,
    db: SharedConnection,
    catalog: CatalogStore,
    jobs: JobStore,
    scanner: Scanner,
    runner: JobRunner,
    watchers: Arc<Mutex<WatchSet>>,
}

fn lock_watchers(watchers: &Mutex<WatchSet>) -> MutexGuard<'_, WatchSet> {
    watchers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Walks and SQLite writes run on the blocking pool, off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::General(format!("background task failed: {err}")))?
}

impl Vault {
    pub fn open(config: VaultConfig, notifier: SharedNotifier) -> Result<Self, AppError> {
        let db = data::open_database(&config.db_path)?;
        Ok(Self::with_connection(config, db, notifier))
    }

    pub fn with_connection(config: VaultConfig, db: SharedConnection, notifier: SharedNotifier) -> Self {
        let catalog = CatalogStore::new(db.clone(), notifier.clone());
        let jobs = JobStore::new(db.clone(), notifier);
        let ingestor = Ingestor::new(catalog.clone(), jobs.clone());
        let runner = JobRunner::new(catalog.clone(), jobs.clone(), &config.runner);
        let watchers = WatchSet::new(ingestor.clone(), config.watcher.clone());
        Self {
            config: RwLock::new(config),
            db,
            catalog,
            jobs,
            scanner: Scanner::new(ingestor),
            runner,
            watchers: Arc::new(Mutex::new(watchers)),
        }
    }

    fn watchers(&self) -> MutexGuard<'_, WatchSet> {
        lock_watchers(&self.watchers)
    }

    pub fn db(&self) -> &SharedConnection {
        &self.db
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn config(&self) -> VaultConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .roots
            .clone()
    }

    pub fn register_handler(&self, work_type: WorkType, handler: Arc<dyn JobHandler>) {
        self.runner.register_handler(work_type, handler);
    }

    async fn cleanup(&self, roots: &[PathBuf]) -> Result<usize, AppError> {
        let scanner = self.scanner.clone();
        let roots = roots.to_vec();
        run_blocking(move || scanner.cleanup(Some(roots.as_slice()))).await
    }

    async fn reconfigure_watchers(&self, roots: &[PathBuf]) -> Result<usize, AppError> {
        let watchers = self.watchers.clone();
        let roots = roots.to_vec();
        run_blocking(move || Ok(lock_watchers(&watchers).reconfigure(&roots))).await
    }

    async fn scan(&self, roots: Vec<PathBuf>) -> Result<ScanReport, AppError> {
        let scanner = self.scanner.clone();
        let report = run_blocking(move || Ok(scanner.scan_roots(&roots))).await?;
        self.runner.poke();
        Ok(report)
    }

    /// Resumes interrupted work, prunes stale records, starts the runner and watchers, then
    /// scans every root. Must be called inside a tokio runtime.
    pub async fn start(&self) -> Result<ScanReport, AppError> {
        let roots = self.roots();
        let requeued = self.jobs.requeue_interrupted()?;
        if requeued > 0 {
            tracing::info!(requeued, "resumed interrupted jobs");
        }
        self.cleanup(&roots).await?;
        self.runner.start();
        let watched = self.reconfigure_watchers(&roots).await?;
        tracing::info!(roots = roots.len(), watched, "media vault started");
        self.scan(roots).await
    }

    pub async fn scan_all(&self) -> Result<ScanReport, AppError> {
        self.scan(self.roots()).await
    }

    pub async fn full_rescan(&self) -> Result<ScanReport, AppError> {
        let scanner = self.scanner.clone();
        let roots = self.roots();
        let report = run_blocking(move || scanner.full_rescan(&roots)).await?;
        self.runner.poke();
        Ok(report)
    }

    /// Replaces the configured roots: drops records outside the new set, re-subscribes the
    /// watchers and scans roots that were not configured before.
    pub async fn set_roots(&self, roots: Vec<PathBuf>) -> Result<ScanReport, AppError> {
        let previous = {
            let mut config = self
                .config
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut config.roots, roots.clone())
        };

        let removed = self.cleanup(&roots).await?;
        let watched = self.reconfigure_watchers(&roots).await?;
        let added: Vec<PathBuf> = roots
            .iter()
            .filter(|root| !previous.contains(root))
            .cloned()
            .collect();
        tracing::info!(removed, watched, added = added.len(), "media roots changed");

        self.scan(added).await
    }

    pub async fn shutdown(&self) {
        let watchers = self.watchers.clone();
        if let Err(err) = run_blocking(move || {
            lock_watchers(&watchers).stop_all();
            Ok(())
        })
        .await
        {
            tracing::warn!(error = %err, "failed to stop watchers");
        }
        self.runner.stop().await;
    }
}

pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod scope_path;
pub mod services;
pub mod state;

pub use config::{RunnerConfig, VaultConfig, WatcherConfig};
pub use error::{AppError, HandlerError};
pub use models::job::{Job, JobPayload, JobStatus, MediaSnapshot, WorkType};
pub use models::media::{DerivedFields, MediaKind, MediaRecord};
pub use services::catalog_store::CatalogStore;
pub use services::job_runner::JobHandler;
pub use services::notifier::{BroadcastNotifier, ChangeEvent, ChangeNotifier, NoopNotifier};
pub use services::scanner::ScanReport;
pub use state::Vault;

const DEFAULT_LOG_FILTER: &str = "media_vault_lib=info";

/// Installs a fmt subscriber filtered by `RUST_LOG`. Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

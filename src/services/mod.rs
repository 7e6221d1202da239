pub mod catalog_store;
pub mod classifier;
pub mod ingest;
pub mod job_runner;
pub mod job_store;
pub mod notifier;
pub mod scanner;
pub mod watcher;

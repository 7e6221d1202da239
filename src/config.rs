use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const MAX_CONCURRENCY: usize = 4;

const DB_FILE_NAME: &str = "media-vault.db";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "media-vault")
}

fn default_cache_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("media-vault").join("cache"))
}

fn default_db_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
        .unwrap_or_else(|| std::env::temp_dir().join("media-vault").join(DB_FILE_NAME))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    pub concurrency: usize,
    pub idle_recheck_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            idle_recheck_ms: 5_000,
        }
    }
}

impl RunnerConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    pub fn idle_recheck(&self) -> Duration {
        Duration::from_millis(self.idle_recheck_ms.max(10))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatcherConfig {
    /// How long a file's size must hold still before it is ingested.
    pub quiet_period_ms: u64,
    pub tick_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1_000,
            tick_ms: 250,
        }
    }
}

impl WatcherConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(10))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaultConfig {
    pub roots: Vec<PathBuf>,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub runner: RunnerConfig,
    pub watcher: WatcherConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            cache_dir: default_cache_dir(),
            db_path: default_db_path(),
            runner: RunnerConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
    }

    pub fn load_or_default(path: &Path) -> Result<Self, AppError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| AppError::Config(format!("{}: {e}", path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Scratch location for handler output such as thumbnails.
    pub fn thumbs_dir(&self) -> PathBuf {
        self.cache_dir.join("thumbs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_is_clamped() {
        let mut runner = RunnerConfig::default();
        assert_eq!(runner.effective_concurrency(), 2);
        runner.concurrency = 0;
        assert_eq!(runner.effective_concurrency(), 1);
        runner.concurrency = 16;
        assert_eq!(runner.effective_concurrency(), MAX_CONCURRENCY);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"roots":["/media/a"],"watcher":{"quietPeriodMs":50}}"#).unwrap();

        let config = VaultConfig::load(&path).unwrap();

        assert_eq!(config.roots, vec![PathBuf::from("/media/a")]);
        assert_eq!(config.watcher.quiet_period_ms, 50);
        assert_eq!(config.watcher.tick_ms, 250);
        assert_eq!(config.runner, RunnerConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = VaultConfig {
            roots: vec![PathBuf::from("/media/b")],
            cache_dir: dir.path().join("cache"),
            db_path: dir.path().join("vault.db"),
            runner: RunnerConfig {
                concurrency: 3,
                idle_recheck_ms: 100,
            },
            watcher: WatcherConfig::default(),
        };

        config.save(&path).unwrap();
        assert_eq!(VaultConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_uses_defaults_but_bad_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let config = VaultConfig::load_or_default(&missing).unwrap();
        assert!(config.roots.is_empty());
        assert!(VaultConfig::load(&missing).is_err());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert!(matches!(
            VaultConfig::load_or_default(&broken),
            Err(AppError::Config(_))
        ));
    }
}

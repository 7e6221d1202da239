use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::event::{AccessKind, AccessMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::WatcherConfig;
use crate::error::AppError;
use crate::scope_path;
use crate::services::classifier;
use crate::services::ingest::Ingestor;
use crate::services::scanner::walk_media_tree;

struct Pending {
    size: Option<u64>,
    since: Instant,
}

/// Per-path quiet-period table. A path becomes due once no event arrived for it and its size
/// did not change for the whole quiet period.
pub struct QuietPeriod {
    quiet: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl QuietPeriod {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: HashMap::new(),
        }
    }

    pub fn touch(&mut self, path: PathBuf, size: Option<u64>, now: Instant) {
        self.pending.insert(path, Pending { size, since: now });
    }

    pub fn forget(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    pub fn forget_under(&mut self, dir: &Path) {
        self.pending.retain(|path, _| !path.starts_with(dir));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns every path whose size held still for the quiet period.
    /// `size_of` returns `None` for a path that is gone; such entries are dropped.
    pub fn take_due<F>(&mut self, now: Instant, size_of: F) -> Vec<PathBuf>
    where
        F: Fn(&Path) -> Option<u64>,
    {
        let mut due = Vec::new();
        let mut gone = Vec::new();
        for (path, pending) in self.pending.iter_mut() {
            if now.saturating_duration_since(pending.since) < self.quiet {
                continue;
            }
            match size_of(path) {
                None => gone.push(path.clone()),
                Some(size) if Some(size) == pending.size => due.push(path.clone()),
                Some(size) => {
                    pending.size = Some(size);
                    pending.since = now;
                }
            }
        }
        for path in gone.iter().chain(due.iter()) {
            self.pending.remove(path);
        }
        due.sort();
        due
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

struct EventLoop {
    root: PathBuf,
    ingestor: Ingestor,
    quiet: QuietPeriod,
}

impl EventLoop {
    fn handle_path(&mut self, path: &Path) {
        if scope_path::is_hidden_below(path, &self.root) {
            return;
        }

        match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => {
                if classifier::classify(path).is_some() {
                    self.quiet
                        .touch(path.to_path_buf(), Some(metadata.len()), Instant::now());
                }
            }
            Ok(metadata) if metadata.is_dir() => {
                // a directory moved in as a whole reports only itself
                for entry in walk_media_tree(path).filter_map(|e| e.ok()) {
                    let child = entry.path();
                    if entry.file_type().is_file() && classifier::classify(child).is_some() {
                        self.quiet
                            .touch(child.to_path_buf(), file_size(child), Instant::now());
                    }
                }
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.quiet.forget(path);
                self.quiet.forget_under(path);
                match self.ingestor.remove_path(path) {
                    Ok(0) => {}
                    Ok(removed) => {
                        tracing::debug!(path = %path.display(), removed, "unlinked media removed")
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "failed to remove unlinked media")
                    }
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to stat watched path")
            }
        }
    }

    fn flush_due(&mut self) {
        for path in self.quiet.take_due(Instant::now(), file_size) {
            if let Err(err) = self.ingestor.ingest_one(&path) {
                tracing::warn!(path = %path.display(), error = %err, "watcher failed to ingest file");
            }
        }
    }

    fn run(mut self, rx: Receiver<notify::Result<notify::Event>>, tick: Duration, stop: Arc<AtomicBool>) {
        loop {
            match rx.recv_timeout(tick) {
                Ok(Ok(event)) => {
                    if is_relevant(&event.kind) {
                        for path in &event.paths {
                            self.handle_path(path);
                        }
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(root = %self.root.display(), error = %err, "watch error");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if stop.load(Ordering::Relaxed) {
                break;
            }
            self.flush_due();
        }
        tracing::debug!(root = %self.root.display(), "watcher loop exited");
    }
}

/// Live subscription for one media root. Dropping it stops the OS watch and joins the
/// debounce thread.
pub struct RootWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RootWatcher {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for RootWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // dropping the OS watcher drops the event sender and disconnects the loop
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

pub fn watch(root: &Path, ingestor: Ingestor, config: &WatcherConfig) -> Result<RootWatcher, AppError> {
    if !root.is_dir() {
        return Err(AppError::Watcher(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    let stop = Arc::new(AtomicBool::new(false));
    let event_loop = EventLoop {
        root: root.to_path_buf(),
        ingestor,
        quiet: QuietPeriod::new(config.quiet_period()),
    };
    let tick = config.tick();
    let stop_for_loop = stop.clone();
    let worker = std::thread::Builder::new()
        .name("media-watch".to_string())
        .spawn(move || event_loop.run(rx, tick, stop_for_loop))?;

    tracing::info!(root = %root.display(), "watching media root");
    Ok(RootWatcher {
        root: root.to_path_buf(),
        watcher: Some(watcher),
        stop,
        worker: Some(worker),
    })
}

/// One watcher per configured root.
pub struct WatchSet {
    ingestor: Ingestor,
    config: WatcherConfig,
    watchers: Vec<RootWatcher>,
}

impl WatchSet {
    pub fn new(ingestor: Ingestor, config: WatcherConfig) -> Self {
        Self {
            ingestor,
            config,
            watchers: Vec::new(),
        }
    }

    /// Tears down every watcher and subscribes to `roots` afresh. A root that cannot be
    /// watched is logged and skipped. Returns how many roots are being watched.
    pub fn reconfigure(&mut self, roots: &[PathBuf]) -> usize {
        self.stop_all();
        for root in roots {
            match watch(root, self.ingestor.clone(), &self.config) {
                Ok(watcher) => self.watchers.push(watcher),
                Err(err) => {
                    tracing::warn!(root = %root.display(), error = %err, "failed to watch media root")
                }
            }
        }
        self.watchers.len()
    }

    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.watchers.iter().map(|w| w.root().to_path_buf()).collect()
    }

    pub fn stop_all(&mut self) {
        self.watchers.clear();
    }
}

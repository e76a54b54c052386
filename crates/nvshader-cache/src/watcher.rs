//! Live cache-directory watching.
//!
//! Registers kernel file notifications on the resolved cache roots and
//! normalizes raw events into a small cache-event model. A close-on-write
//! in a shader cache directory marks the end of a pipeline compilation,
//! which is the signal front ends surface as "game is compiling shaders".
//!
//! The notify backend delivers events on its own thread into a channel;
//! [`CacheWatcher::poll`] drains that channel without blocking and
//! [`CacheWatcher::run`] wraps it in a ~100 ms cadence loop.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use nvshader_core::{CachePaths, Result};

/// Poll cadence for [`CacheWatcher::run`].
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Logical cache events, classified from raw notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    Created,
    Modified,
    Deleted,
    /// A writer closed a cache file: a compilation finished.
    CompilationEnd,
}

/// One observed cache event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub path: PathBuf,
}

/// Session totals per event class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub created: u64,
    pub modified: u64,
    pub deleted: u64,
    pub compilations: u64,
}

impl WatchStats {
    fn record(&mut self, kind: CacheEventKind) {
        match kind {
            CacheEventKind::Created => self.created += 1,
            CacheEventKind::Modified => self.modified += 1,
            CacheEventKind::Deleted => self.deleted += 1,
            CacheEventKind::CompilationEnd => self.compilations += 1,
        }
    }
}

/// Handle for stopping a running watcher from outside its loop.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    running: Arc<AtomicBool>,
}

impl WatchHandle {
    /// Ask the watcher loop to exit after its current poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Watches cache roots and dispatches classified events.
pub struct CacheWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
    roots: Vec<PathBuf>,
    stats: WatchStats,
    callback: Option<Box<dyn FnMut(&CacheEvent)>>,
    running: Arc<AtomicBool>,
}

impl CacheWatcher {
    /// Watch every existing root in `paths`.
    ///
    /// Up to five directories are registered: NVIDIA, Mesa, DXVK, vkd3d
    /// and the Fossilize location. Missing roots are skipped.
    pub fn new(paths: &CachePaths) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let watcher = RecommendedWatcher::new(
            move |event| {
                let _ = sender.send(event);
            },
            notify::Config::default(),
        )
        .map_err(into_io)?;

        let mut this = Self {
            watcher,
            receiver,
            roots: Vec::new(),
            stats: WatchStats::default(),
            callback: None,
            running: Arc::new(AtomicBool::new(true)),
        };

        let candidates = [
            paths.nvidia.as_deref(),
            paths.mesa.as_deref(),
            paths.dxvk.as_deref(),
            paths.vkd3d.as_deref(),
            paths.fossilize.as_deref(),
        ];
        for root in candidates.into_iter().flatten() {
            this.watch_root(root);
        }
        Ok(this)
    }

    fn watch_root(&mut self, root: &Path) {
        match self.watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                tracing::debug!(root = %root.display(), "watching cache root");
                self.roots.push(root.to_path_buf());
            }
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "failed to watch cache root");
            }
        }
    }

    /// The directories successfully registered.
    #[must_use]
    pub fn watched_roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Session totals so far.
    #[must_use]
    pub fn stats(&self) -> WatchStats {
        self.stats
    }

    /// Register the event callback, replacing any previous one.
    pub fn on_event(&mut self, callback: impl FnMut(&CacheEvent) + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Handle for stopping [`CacheWatcher::run`] from a callback or
    /// another owner.
    #[must_use]
    pub fn handle(&self) -> WatchHandle {
        WatchHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Drain pending notifications without blocking, returning the
    /// classified events in arrival order.
    pub fn poll(&mut self) -> Vec<CacheEvent> {
        let mut events = Vec::new();
        while let Ok(received) = self.receiver.try_recv() {
            let raw = match received {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!(error = %err, "watch backend error");
                    continue;
                }
            };
            let Some(kind) = classify(&raw.kind) else {
                continue;
            };
            for path in raw.paths {
                let event = CacheEvent { kind, path };
                self.stats.record(event.kind);
                if let Some(callback) = &mut self.callback {
                    callback(&event);
                }
                events.push(event);
            }
        }
        events
    }

    /// Poll at ~100 ms cadence until [`WatchHandle::stop`] is called.
    pub fn run(&mut self) {
        self.running.store(true, Ordering::Relaxed);
        while self.running.load(Ordering::Relaxed) {
            self.poll();
            std::thread::sleep(POLL_INTERVAL);
        }
        self.release();
    }

    /// Stop watching every root and mark the loop stopped.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.release();
    }

    fn release(&mut self) {
        for root in std::mem::take(&mut self.roots) {
            if let Err(err) = self.watcher.unwatch(&root) {
                tracing::debug!(root = %root.display(), error = %err, "unwatch failed");
            }
        }
    }
}

/// Map a raw notification kind onto the cache event model.
///
/// Close-on-write takes precedence over plain modification: the backend
/// reports them as distinct kinds, and a close-write is the compilation
/// signal even though the file was also modified.
fn classify(kind: &EventKind) -> Option<CacheEventKind> {
    match kind {
        EventKind::Create(_) => Some(CacheEventKind::Created),
        EventKind::Remove(_) => Some(CacheEventKind::Deleted),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            Some(CacheEventKind::CompilationEnd)
        }
        EventKind::Modify(_) => Some(CacheEventKind::Modified),
        _ => None,
    }
}

fn into_io(err: notify::Error) -> nvshader_core::NvError {
    nvshader_core::NvError::Io(std::io::Error::other(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_classification() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(CacheEventKind::Created)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File)),
            Some(CacheEventKind::Deleted)
        );
        assert_eq!(
            classify(&EventKind::Access(AccessKind::Close(AccessMode::Write))),
            Some(CacheEventKind::CompilationEnd)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Any)),
            Some(CacheEventKind::Modified)
        );
        // Reads are noise.
        assert_eq!(classify(&EventKind::Access(AccessKind::Read)), None);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = WatchStats::default();
        stats.record(CacheEventKind::Created);
        stats.record(CacheEventKind::CompilationEnd);
        stats.record(CacheEventKind::CompilationEnd);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.compilations, 2);
        assert_eq!(stats.deleted, 0);
    }

    #[test]
    fn test_watcher_observes_writes() {
        use std::fs;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let paths = CachePaths {
            dxvk: Some(dir.path().to_path_buf()),
            ..CachePaths::default()
        };

        let mut watcher = CacheWatcher::new(&paths).unwrap();
        assert_eq!(watcher.watched_roots().len(), 1);

        fs::write(dir.path().join("game.dxvk-cache"), b"DXVK").unwrap();

        // Give the backend thread a moment to deliver.
        let mut seen = Vec::new();
        for _ in 0..50 {
            seen.extend(watcher.poll());
            if !seen.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!seen.is_empty());
        let stats = watcher.stats();
        assert!(stats.created + stats.modified + stats.compilations > 0);

        watcher.stop();
        assert!(watcher.watched_roots().is_empty());
    }
}

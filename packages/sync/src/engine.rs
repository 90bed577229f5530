// ABOUTME: FileSyncEngine pushing trees into a sandbox and watching its storage
// ABOUTME: Suppresses self-caused echoes and debounces external changes per path

use crate::recent::RecentWriteSet;
use crate::tree::FileTree;
use crate::{Result, SyncError};
use burrow_runtime::Provider;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Quiet period a path must hold before its change is reported.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Noisy subtrees the watcher never descends into: dependency install
/// output, build caches, version-control metadata.
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    ".nuxt",
    ".cache",
    ".turbo",
    ".svelte-kit",
    "coverage",
    "__pycache__",
];

/// OS- and editor-generated files that carry no project content.
const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];
const IGNORED_SUFFIXES: &[&str] = &[".swp", ".swo", ".tmp", "~"];

/// A change observed in sandbox storage that did not originate from the
/// engine's own writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WatchEvent {
    Changed { path: String, contents: String },
    Deleted { path: String },
}

#[derive(Clone)]
struct WatchContext {
    root: PathBuf,
    recent: Arc<RecentWriteSet>,
    events: broadcast::Sender<WatchEvent>,
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    runtime: tokio::runtime::Handle,
}

/// Keeps one sandbox's storage directory in sync with the editing session.
///
/// `push` moves a whole tree in as a single archive transfer; the watcher
/// reports changes made from inside the sandbox (or by any other external
/// writer) without echoing the engine's own pushes back.
pub struct FileSyncEngine {
    root: PathBuf,
    container_root: String,
    recent: Arc<RecentWriteSet>,
    events: broadcast::Sender<WatchEvent>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl FileSyncEngine {
    /// `root` is the host-visible storage directory bind-mounted into the
    /// sandbox at `container_root`.
    pub fn new(root: PathBuf, container_root: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            root,
            container_root: container_root.into(),
            recent: Arc::new(RecentWriteSet::new()),
            events,
            watcher: Mutex::new(None),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Transfer `tree` into the sandbox as one tar upload. Every path in the
    /// tree is recorded as a recent self-write first, so the watcher stays
    /// silent about the files landing on disk.
    pub async fn push(
        &self,
        provider: &dyn Provider,
        container_id: &str,
        tree: &FileTree,
    ) -> Result<()> {
        if tree.is_empty() {
            return Ok(());
        }

        for path in tree.relative_paths() {
            self.recent.mark(&path);
        }

        let archive = tree.to_tar()?;
        debug!(
            container_id,
            bytes = archive.len(),
            "pushing file tree into sandbox"
        );
        provider
            .put_archive(container_id, &self.container_root, archive)
            .await?;
        Ok(())
    }

    /// Start watching the storage directory recursively. No-op if a watcher
    /// is already running. Must be called from within a tokio runtime.
    pub fn start_watch(&self) -> Result<()> {
        let mut guard = self.watcher.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::Watch("watcher requires a tokio runtime".to_string()))?;

        let ctx = WatchContext {
            root: self.root.clone(),
            recent: Arc::clone(&self.recent),
            events: self.events.clone(),
            timers: Arc::clone(&self.timers),
            runtime,
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => on_fs_event(&ctx, event),
                Err(e) => warn!("watch error: {}", e),
            }
        })
        .map_err(|e| SyncError::Watch(e.to_string()))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Watch(e.to_string()))?;

        debug!(root = %self.root.display(), "started storage watcher");
        *guard = Some(watcher);
        Ok(())
    }

    /// Drop the watcher and cancel every pending debounce timer. Safe to
    /// call when not watching.
    pub fn stop_watch(&self) {
        let mut guard = self.watcher.lock().unwrap();
        if guard.take().is_some() {
            debug!(root = %self.root.display(), "stopped storage watcher");
        }
        drop(guard);

        let mut timers = self.timers.lock().unwrap();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().unwrap().is_some()
    }
}

impl Drop for FileSyncEngine {
    fn drop(&mut self) {
        self.stop_watch();
    }
}

fn on_fs_event(ctx: &WatchContext, event: notify::Event) {
    use notify::EventKind;

    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return;
    }

    for path in event.paths {
        let Ok(rel) = path.strip_prefix(&ctx.root) else {
            continue;
        };
        if rel.as_os_str().is_empty() || is_ignored(rel) {
            continue;
        }

        let rel_key = rel.to_string_lossy().replace('\\', "/");

        if ctx.recent.contains_fresh(&rel_key) {
            trace!(path = %rel_key, "suppressing echo of our own write");
            continue;
        }

        schedule_debounce(ctx, rel_key, path.clone());
    }
}

/// Reset the per-path timer: the previous pending report for this path is
/// cancelled and a fresh quiet period begins.
fn schedule_debounce(ctx: &WatchContext, rel_key: String, abs: PathBuf) {
    let events = ctx.events.clone();
    let timers = Arc::clone(&ctx.timers);
    let key = rel_key.clone();

    let handle = ctx.runtime.spawn(async move {
        tokio::time::sleep(DEBOUNCE_WINDOW).await;
        timers.lock().unwrap().remove(&key);

        let event = match tokio::fs::metadata(&abs).await {
            Ok(meta) if meta.is_file() => match tokio::fs::read(&abs).await {
                Ok(bytes) => WatchEvent::Changed {
                    path: key.clone(),
                    contents: String::from_utf8_lossy(&bytes).into_owned(),
                },
                // Deleted between detection and read: report the deletion
                Err(_) => WatchEvent::Deleted { path: key.clone() },
            },
            Ok(_) => return, // directories themselves are not reported
            Err(_) => WatchEvent::Deleted { path: key.clone() },
        };

        let _ = events.send(event);
    });

    let mut map = ctx.timers.lock().unwrap();
    if let Some(previous) = map.insert(rel_key, handle) {
        previous.abort();
    }
}

fn is_ignored(rel: &Path) -> bool {
    for component in rel.components() {
        let name = component.as_os_str().to_string_lossy();
        if IGNORED_DIRS.contains(&name.as_ref()) {
            return true;
        }
    }

    if let Some(name) = rel.file_name().map(|n| n.to_string_lossy()) {
        if IGNORED_FILES.contains(&name.as_ref()) {
            return true;
        }
        if IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_list_covers_noisy_subtrees() {
        assert!(is_ignored(Path::new("node_modules/react/index.js")));
        assert!(is_ignored(Path::new(".git/HEAD")));
        assert!(is_ignored(Path::new("src/.cache/x")));
        assert!(is_ignored(Path::new(".DS_Store")));
        assert!(is_ignored(Path::new("src/index.ts.swp")));
        assert!(!is_ignored(Path::new("src/index.ts")));
        assert!(!is_ignored(Path::new("package.json")));
    }

    #[test]
    fn stop_watch_is_safe_when_not_watching() {
        let engine = FileSyncEngine::new(PathBuf::from("/tmp/nowhere"), "/workspace");
        engine.stop_watch();
        assert!(!engine.is_watching());
    }
}

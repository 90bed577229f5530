// ABOUTME: Short-lived set of paths the engine itself just wrote
// ABOUTME: Keeps the watcher from re-reporting our own writes as external changes

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a self-write keeps suppressing watcher events for its path.
pub(crate) const WRITE_GRACE: Duration = Duration::from_secs(2);

/// Paths recently written by the sync engine, each expiring after the grace
/// window. Mutated only from within this crate; never persisted.
#[derive(Debug)]
pub(crate) struct RecentWriteSet {
    grace: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl RecentWriteSet {
    pub(crate) fn new() -> Self {
        Self::with_grace(WRITE_GRACE)
    }

    pub(crate) fn with_grace(grace: Duration) -> Self {
        Self {
            grace,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn mark(&self, path: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(path.to_string(), Instant::now());
    }

    /// True while `path` is inside its grace window. Expired entries are
    /// pruned on the way through.
    pub(crate) fn contains_fresh(&self, path: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let grace = self.grace;
        entries.retain(|_, marked| marked.elapsed() < grace);
        entries.contains_key(path)
    }
}

//! Filesystem change detection for live reload.
//!
//! Watches the served root recursively, filters out noise, debounces
//! per-path bursts, and forwards accepted changes to the subscriber hub.
//! File watching is a capability: when the OS facility is unavailable the
//! server runs without live reload.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher};

use beacon_core::error::ServerError;
use beacon_core::events::{ChangeEvent, ChangeKind};

use crate::hub::SubscriberHub;

/// Directory names that never produce reload events.
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    "venv",
    "target",
    "dist",
    "build",
    "logs",
];

/// Extensions that trigger a reload: markup, scripts, styles, data.
const WATCHED_EXTENSIONS: &[&str] = &[
    "html", "htm", "css", "js", "mjs", "json", "csv", "svg", "md",
];

/// Configuration for the change watcher.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Repeat events for the same path inside this window are suppressed.
    pub debounce_window: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
        }
    }
}

/// Watches a directory tree and broadcasts debounced changes.
pub struct ChangeWatcher {
    root: PathBuf,
    config: WatcherConfig,
    running: Arc<AtomicBool>,
}

impl ChangeWatcher {
    pub fn new(root: PathBuf) -> Self {
        Self::with_config(root, WatcherConfig::default())
    }

    pub fn with_config(root: PathBuf, config: WatcherConfig) -> Self {
        Self {
            root,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start watching and forwarding changes to `hub`.
    ///
    /// Returns the error that made the capability unavailable; the caller
    /// decides whether to degrade or fail.
    pub fn start(&self, hub: Arc<SubscriberHub>) -> Result<WatcherHandle, ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            // Already running
            return Ok(WatcherHandle {
                running: Arc::clone(&self.running),
            });
        }

        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());

        let (tx, rx) = mpsc::channel();
        let mut watcher = match notify::recommended_watcher(move |res| {
            // The OS callback only hands off; all filtering happens on the
            // processing thread.
            let _ = tx.send(res);
        }) {
            Ok(watcher) => watcher,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(ServerError::WatchUnavailable(e.to_string()));
            }
        };

        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            self.running.store(false, Ordering::SeqCst);
            return Err(ServerError::WatchUnavailable(e.to_string()));
        }

        let window = self.config.debounce_window;
        let running = Arc::clone(&self.running);
        let thread_running = Arc::clone(&self.running);

        std::thread::spawn(move || {
            // Per-path last-emit times. Single-writer: only this thread.
            let mut last_emitted: HashMap<PathBuf, Instant> = HashMap::new();

            while thread_running.load(Ordering::SeqCst) {
                // Entries past 2x the window can no longer suppress anything.
                let now = Instant::now();
                last_emitted.retain(|_, at| now.duration_since(*at) < window * 2);

                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(Ok(event)) => process_event(event, &root, window, &mut last_emitted, &hub),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Watch backend error");
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }

            // Keep the OS watcher alive until the thread exits.
            drop(watcher);
        });

        Ok(WatcherHandle { running })
    }

    /// Stop watching.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Filter, debounce, and broadcast one raw notification.
fn process_event(
    event: Event,
    root: &Path,
    window: Duration,
    last_emitted: &mut HashMap<PathBuf, Instant>,
    hub: &SubscriberHub,
) {
    let Some(kind) = classify(&event.kind) else {
        return;
    };

    let now = Instant::now();
    let mut accepted: Vec<PathBuf> = Vec::new();
    for path in event.paths {
        if !is_watched_path(&path) {
            tracing::trace!(path = %path.display(), "Filtered out");
            continue;
        }
        if let Some(at) = last_emitted.get(&path) {
            if now.duration_since(*at) < window {
                tracing::trace!(path = %path.display(), "Debounced");
                continue;
            }
        }
        last_emitted.insert(path.clone(), now);
        accepted.push(path);
    }

    if accepted.is_empty() {
        return;
    }

    let paths: Vec<PathBuf> = accepted
        .iter()
        .map(|p| p.strip_prefix(root).unwrap_or(p).to_path_buf())
        .collect();

    tracing::info!(count = paths.len(), kind = kind.as_str(), "Change accepted");
    hub.broadcast(&ChangeEvent::now(paths, kind));
}

/// Map a raw notification kind onto a reload reason.
fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) | EventKind::Any => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// Whether a path can trigger a reload at all.
fn is_watched_path(path: &Path) -> bool {
    // Hidden and tool-generated directories anywhere in the path disqualify
    // it; this covers VCS metadata, caches, and virtualenvs.
    for component in path.components() {
        if let Component::Normal(name) = component {
            let name = name.to_string_lossy();
            if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref()) {
                return false;
            }
        }
    }

    // Editor temp and swap churn.
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if file_name.ends_with('~')
        || file_name.ends_with(".tmp")
        || file_name.ends_with(".swp")
        || file_name.ends_with(".log")
    {
        return false;
    }

    match path.extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_lowercase();
            WATCHED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Handle for a running watcher. Dropping it stops the watcher.
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::events::Frame;
    use notify::event::ModifyKind;

    fn modify_event(path: &str) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from(path))
    }

    #[test]
    fn watched_paths_accept_content_files() {
        assert!(is_watched_path(Path::new("/site/index.html")));
        assert!(is_watched_path(Path::new("/site/css/app.css")));
        assert!(is_watched_path(Path::new("/site/js/chart.mjs")));
        assert!(is_watched_path(Path::new("/site/data/metrics.json")));
    }

    #[test]
    fn watched_paths_reject_metadata_and_caches() {
        assert!(!is_watched_path(Path::new("/site/.git/objects/ab")));
        assert!(!is_watched_path(Path::new("/site/node_modules/pkg/index.js")));
        assert!(!is_watched_path(Path::new("/site/__pycache__/mod.json")));
        assert!(!is_watched_path(Path::new("/site/.hidden/page.html")));
    }

    #[test]
    fn watched_paths_reject_temp_and_swap_files() {
        assert!(!is_watched_path(Path::new("/site/index.html~")));
        assert!(!is_watched_path(Path::new("/site/app.js.swp")));
        assert!(!is_watched_path(Path::new("/site/upload.tmp")));
        assert!(!is_watched_path(Path::new("/site/server.log")));
    }

    #[test]
    fn watched_paths_reject_unknown_extensions() {
        assert!(!is_watched_path(Path::new("/site/binary.exe")));
        assert!(!is_watched_path(Path::new("/site/README")));
    }

    #[test]
    fn classify_maps_event_kinds() {
        assert_eq!(
            classify(&EventKind::Create(notify::event::CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Any)),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            classify(&EventKind::Remove(notify::event::RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(classify(&EventKind::Other), None);
    }

    #[test]
    fn repeat_change_within_window_broadcasts_once() {
        let hub = SubscriberHub::new(8);
        let (_id, mut rx) = hub.subscribe("127.0.0.1".into());
        assert!(matches!(rx.try_recv(), Ok(Frame::Connected)));

        let window = Duration::from_millis(500);
        let mut last_emitted = HashMap::new();
        let root = Path::new("/site");

        process_event(modify_event("/site/index.html"), root, window, &mut last_emitted, &hub);
        process_event(modify_event("/site/index.html"), root, window, &mut last_emitted, &hub);

        assert!(matches!(rx.try_recv(), Ok(Frame::Reload { .. })));
        assert!(rx.try_recv().is_err(), "second event must be debounced");
    }

    #[test]
    fn change_after_window_broadcasts_again() {
        let hub = SubscriberHub::new(8);
        let (_id, mut rx) = hub.subscribe("127.0.0.1".into());
        assert!(matches!(rx.try_recv(), Ok(Frame::Connected)));

        let window = Duration::from_millis(500);
        let mut last_emitted = HashMap::new();
        let root = Path::new("/site");

        process_event(modify_event("/site/index.html"), root, window, &mut last_emitted, &hub);
        // Age the entry past the window instead of sleeping.
        let at = last_emitted.get_mut(Path::new("/site/index.html")).unwrap();
        *at = Instant::now() - Duration::from_millis(600);
        process_event(modify_event("/site/index.html"), root, window, &mut last_emitted, &hub);

        assert!(matches!(rx.try_recv(), Ok(Frame::Reload { .. })));
        assert!(matches!(rx.try_recv(), Ok(Frame::Reload { .. })));
    }

    #[test]
    fn distinct_paths_do_not_debounce_each_other() {
        let hub = SubscriberHub::new(8);
        let (_id, mut rx) = hub.subscribe("127.0.0.1".into());
        assert!(matches!(rx.try_recv(), Ok(Frame::Connected)));

        let window = Duration::from_millis(500);
        let mut last_emitted = HashMap::new();
        let root = Path::new("/site");

        process_event(modify_event("/site/index.html"), root, window, &mut last_emitted, &hub);
        process_event(modify_event("/site/app.js"), root, window, &mut last_emitted, &hub);

        assert!(matches!(rx.try_recv(), Ok(Frame::Reload { .. })));
        assert!(matches!(rx.try_recv(), Ok(Frame::Reload { .. })));
    }

    #[test]
    fn filtered_events_broadcast_nothing() {
        let hub = SubscriberHub::new(8);
        let (_id, mut rx) = hub.subscribe("127.0.0.1".into());
        assert!(matches!(rx.try_recv(), Ok(Frame::Connected)));

        let mut last_emitted = HashMap::new();
        process_event(
            modify_event("/site/.git/index"),
            Path::new("/site"),
            Duration::from_millis(500),
            &mut last_emitted,
            &hub,
        );

        assert!(rx.try_recv().is_err());
        assert!(last_emitted.is_empty(), "filtered paths never enter the table");
    }

    #[test]
    fn start_fails_on_missing_root() {
        let watcher = ChangeWatcher::new(PathBuf::from("/nonexistent/beacon-test-root"));
        let hub = Arc::new(SubscriberHub::new(8));
        let result = watcher.start(hub);
        assert!(matches!(result, Err(ServerError::WatchUnavailable(_))));
    }
}

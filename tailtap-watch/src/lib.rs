//! Translates OS filesystem notifications into `tailtap_core::FsEvent`s and
//! publishes them onto a bus. Deliberately thin: all backpressure and
//! processing policy lives in `tailtap-core`, this crate only classifies
//! and forwards.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use tailtap_core::{Bus, FsEvent, FsEventKind};

/// How long a `RenameMode::From` is allowed to sit unpaired before the
/// reaper thread gives up on seeing a matching `To` and treats it as a
/// delete. Covers the case where a tracked file is moved out of the
/// watched directory entirely, so the OS backend never reports the other
/// half of the rename. Kept well above the time a large rename batch (e.g.
/// rotating many files at once) should take to drain through the single
/// notify callback, so a slow batch doesn't get misread as an abandoned
/// rename.
const PENDING_RENAME_GRACE: Duration = Duration::from_secs(2);
const REAPER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Decides whether a path is one this system should tail, based on a
/// configured set of file extensions (case-insensitive, compared without
/// the leading dot).
#[derive(Debug, Clone)]
pub struct ExtensionPolicy {
    extensions: Vec<String>,
}

impl ExtensionPolicy {
    pub fn new(extensions: impl IntoIterator<Item = String>) -> Self {
        Self {
            extensions: extensions.into_iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

/// Watches one directory (non-recursively) and publishes `FsEvent`s for
/// every create/modify/delete/rename `notify` reports. Backend errors
/// (overflow, dropped events) are counted rather than surfaced as bus
/// traffic, since the bus's own drop-newest counters already cover
/// downstream backpressure.
pub struct DirectoryWatcher {
    // Kept alive for the watcher's lifetime; dropping it stops the
    // underlying OS watch.
    _inner: RecommendedWatcher,
    backend_errors: Arc<AtomicU64>,
    reaper_stop: Arc<AtomicBool>,
    reaper_handle: Option<JoinHandle<()>>,
}

/// Tracks unpaired `RenameMode::From` halves, keyed by the OS-provided
/// rename cookie so interleaved renames of different files (e.g. a batch
/// log rotation) don't get cross-paired. Each key holds a FIFO queue rather
/// than a single slot: backends that don't supply a cookie all key to
/// `None`, and a queue lets several such renames stay pending at once
/// instead of the newest silently clobbering the others. Within a `None`
/// queue, a `To` still picks the first entry whose path no longer exists
/// on disk rather than blindly trusting arrival order, since interleaved
/// renames of different files can reach the callback out of order.
struct RenameTracker {
    pending_from: HashMap<Option<usize>, VecDeque<(PathBuf, Instant)>>,
}

fn classify_and_publish(
    event: notify::Event,
    policy: &ExtensionPolicy,
    bus: &Bus<FsEvent>,
    tracker: &mut RenameTracker,
) {
    let cookie = event.attrs.tracker();
    match event.kind {
        EventKind::Create(_) => {
            for path in event.paths {
                let processable = policy.matches(&path);
                bus.publish(FsEvent::new(FsEventKind::Created, path, processable));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = &event.paths[..] {
                let processable = policy.matches(to);
                bus.publish(FsEvent::renamed(from.clone(), to.clone(), processable));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(path) = event.paths.into_iter().next() {
                tracker
                    .pending_from
                    .entry(cookie)
                    .or_default()
                    .push_back((path, Instant::now()));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            if let Some(path) = event.paths.into_iter().next() {
                // Without a cookie, FIFO order alone can mis-pair interleaved
                // renames of different files. A `From` whose path still
                // exists on disk wasn't actually replaced by this `To`, so
                // skip past it rather than trust queue order blindly.
                let paired = tracker.pending_from.get_mut(&cookie).and_then(|queue| {
                    let position = queue.iter().position(|(from, _)| !from.exists());
                    position.and_then(|i| queue.remove(i))
                });
                match paired {
                    Some((from, _)) => {
                        let processable = policy.matches(&path);
                        bus.publish(FsEvent::renamed(from, path, processable));
                    }
                    None => {
                        let processable = policy.matches(&path);
                        bus.publish(FsEvent::new(FsEventKind::Created, path, processable));
                    }
                }
            }
        }
        EventKind::Modify(_) => {
            for path in event.paths {
                let processable = policy.matches(&path);
                bus.publish(FsEvent::new(FsEventKind::Modified, path, processable));
            }
        }
        EventKind::Remove(_) => {
            for path in event.paths {
                let processable = policy.matches(&path);
                bus.publish(FsEvent::new(FsEventKind::Deleted, path, processable));
            }
        }
        EventKind::Access(_) | EventKind::Other | EventKind::Any => {}
    }
}

/// Periodically sweeps every `pending_from` entry that has sat unpaired past
/// `PENDING_RENAME_GRACE` and publishes it as a delete, so a file moved out
/// of the watched directory doesn't leak its registry entry forever.
fn reap_stale_renames(
    tracker: &Arc<Mutex<RenameTracker>>,
    bus: &Bus<FsEvent>,
    policy: &ExtensionPolicy,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Acquire) {
        thread::sleep(REAPER_POLL_INTERVAL);
        let stale: Vec<PathBuf> = {
            let mut tracker = tracker.lock().unwrap();
            let mut stale = Vec::new();
            tracker.pending_from.retain(|_, queue| {
                while matches!(queue.front(), Some((_, since)) if since.elapsed() >= PENDING_RENAME_GRACE)
                {
                    if let Some((path, _)) = queue.pop_front() {
                        stale.push(path);
                    }
                }
                !queue.is_empty()
            });
            stale
        };
        for path in stale {
            let processable = policy.matches(&path);
            bus.publish(FsEvent::new(FsEventKind::Deleted, path, processable));
        }
    }
}

impl DirectoryWatcher {
    pub fn spawn(
        dir: &Path,
        policy: ExtensionPolicy,
        bus: Arc<Bus<FsEvent>>,
    ) -> notify::Result<Self> {
        let backend_errors = Arc::new(AtomicU64::new(0));
        let backend_errors_clone = Arc::clone(&backend_errors);
        let tracker = Arc::new(Mutex::new(RenameTracker { pending_from: HashMap::new() }));

        let callback_tracker = Arc::clone(&tracker);
        let callback_bus = Arc::clone(&bus);
        let callback_policy = policy.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let mut tracker = callback_tracker.lock().unwrap();
                    classify_and_publish(event, &callback_policy, &callback_bus, &mut tracker);
                }
                Err(e) => {
                    log::warn!("filesystem watcher backend error: {e}");
                    backend_errors_clone.fetch_add(1, Ordering::Relaxed);
                }
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let reaper_stop = Arc::new(AtomicBool::new(false));
        let reaper_stop_clone = Arc::clone(&reaper_stop);
        let reaper_tracker = Arc::clone(&tracker);
        let reaper_bus = Arc::clone(&bus);
        let reaper_policy = policy;
        let reaper_handle = thread::Builder::new()
            .name("tailtap-watch-reaper".into())
            .spawn(move || {
                reap_stale_renames(&reaper_tracker, &reaper_bus, &reaper_policy, &reaper_stop_clone);
            })
            .expect("failed to spawn tailtap-watch reaper thread");

        Ok(Self {
            _inner: watcher,
            backend_errors,
            reaper_stop,
            reaper_handle: Some(reaper_handle),
        })
    }

    pub fn backend_errors(&self) -> u64 {
        self.backend_errors.load(Ordering::Relaxed)
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.reaper_stop.store(true, Ordering::Release);
        if let Some(handle) = self.reaper_handle.take() {
            if handle.join().is_err() {
                log::warn!("tailtap-watch rename reaper thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_policy_matches_case_insensitively() {
        let policy = ExtensionPolicy::new(["log".to_string()]);
        assert!(policy.matches(Path::new("/var/log/app.LOG")));
        assert!(policy.matches(Path::new("/var/log/app.log")));
        assert!(!policy.matches(Path::new("/var/log/app.txt")));
    }

    #[test]
    fn extension_policy_rejects_paths_without_extension() {
        let policy = ExtensionPolicy::new(["log".to_string()]);
        assert!(!policy.matches(Path::new("/var/log/app")));
    }

    #[test]
    fn watcher_publishes_create_events_for_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(Bus::new(16));
        let policy = ExtensionPolicy::new(["log".to_string()]);
        let watcher = DirectoryWatcher::spawn(dir.path(), policy, Arc::clone(&bus)).unwrap();

        let file_path = dir.path().join("new.log");
        std::fs::write(&file_path, b"hello\n").unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut saw_create = false;
        while std::time::Instant::now() < deadline {
            if let Some(event) = bus.try_dequeue(std::time::Duration::from_millis(100)) {
                if event.kind == FsEventKind::Created && event.path == file_path {
                    saw_create = true;
                    break;
                }
            }
        }
        assert!(saw_create, "expected a Created event for the new file");
        assert_eq!(watcher.backend_errors(), 0);
    }

    #[test]
    fn unpaired_rename_from_is_reaped_as_a_delete() {
        let bus = Arc::new(Bus::new(16));
        let policy = ExtensionPolicy::new(["log".to_string()]);
        let tracker = Arc::new(Mutex::new(RenameTracker { pending_from: HashMap::new() }));

        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/watched/moved-out.log"));
        {
            let mut tracker_guard = tracker.lock().unwrap();
            classify_and_publish(event, &policy, &bus, &mut tracker_guard);
        }
        assert!(bus.try_dequeue(Duration::from_millis(50)).is_none());

        let stop = Arc::new(AtomicBool::new(false));
        let reaper_tracker = Arc::clone(&tracker);
        let reaper_bus = Arc::clone(&bus);
        let reaper_policy = policy.clone();
        let reaper_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            reap_stale_renames(&reaper_tracker, &reaper_bus, &reaper_policy, &reaper_stop);
        });

        let event = bus
            .try_dequeue(PENDING_RENAME_GRACE + Duration::from_secs(2))
            .expect("expected the stale rename to be reaped as a delete");
        assert_eq!(event.kind, FsEventKind::Deleted);
        assert_eq!(event.path, PathBuf::from("/watched/moved-out.log"));

        stop.store(true, Ordering::Release);
        handle.join().unwrap();
    }
}

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bus::Bus;
use crate::fsevent::{FsEvent, FsEventKind};
use crate::registry::FileStateRegistry;
use crate::stats::WorkerStats;
use crate::tailer::Tailer;

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct CoordinatorConfig {
    pub workers: usize,
    pub dequeue_timeout: Duration,
    /// Builds a fresh `Tailer` for each worker thread; called once per
    /// worker at spawn time so every worker owns its own scratch buffer.
    pub tailer_factory: Arc<dyn Fn() -> Box<dyn Tailer> + Send + Sync>,
}

fn handle_create_or_modify(
    path: &Path,
    registry: &FileStateRegistry,
    stats: &WorkerStats,
    tailer: &dyn Tailer,
) {
    let state = registry.get_or_create(path);
    let mut guard = match state.try_acquire() {
        Some(g) => g,
        None => {
            state.mark_dirty_if_allowed();
            stats.with_active(|b| b.coalesced_due_to_busy_gate += 1);
            return;
        }
    };

    if guard.is_delete_pending() {
        stats.with_active(|b| b.skipped_due_to_delete_pending += 1);
        registry.finalize_delete(path);
        drop(guard);
        stats.with_active(|b| b.file_state_removed += 1);
        return;
    }

    loop {
        stats.ack_swap_if_requested();

        if guard.is_delete_pending() {
            stats.with_active(|b| b.skipped_due_to_delete_pending += 1);
            registry.finalize_delete(path);
            drop(guard);
            stats.with_active(|b| b.file_state_removed += 1);
            return;
        }

        stats.with_active(|b| crate::processor::process_once(tailer, path, &mut guard, b));
        stats.ack_swap_if_requested();

        if guard.is_delete_pending() {
            registry.finalize_delete(path);
            drop(guard);
            stats.with_active(|b| b.file_state_removed += 1);
            return;
        }

        if guard.is_dirty() {
            guard.clear_dirty();
            continue;
        }
        break;
    }
}

fn handle_delete(path: &Path, registry: &FileStateRegistry, stats: &WorkerStats) {
    let Some(state) = registry.try_get(path) else {
        return;
    };
    match state.try_acquire() {
        None => {
            state.mark_delete_pending();
            stats.with_active(|b| b.delete_pending_set += 1);
        }
        Some(guard) => {
            state.mark_delete_pending();
            registry.finalize_delete(path);
            drop(guard);
            stats.with_active(|b| b.file_state_removed += 1);
        }
    }
}

fn handle_event(
    event: &FsEvent,
    registry: &FileStateRegistry,
    stats: &WorkerStats,
    tailer: &dyn Tailer,
) {
    match event.kind {
        FsEventKind::Created => {
            stats.with_active(|b| b.fs_created += 1);
            if event.processable {
                handle_create_or_modify(&event.path, registry, stats, tailer);
            }
        }
        FsEventKind::Modified => {
            stats.with_active(|b| b.fs_modified += 1);
            if event.processable {
                handle_create_or_modify(&event.path, registry, stats, tailer);
            }
        }
        FsEventKind::Deleted => {
            stats.with_active(|b| b.fs_deleted += 1);
            handle_delete(&event.path, registry, stats);
        }
        FsEventKind::Renamed => {
            stats.with_active(|b| b.fs_renamed += 1);
            if let Some(old_path) = &event.old_path {
                handle_delete(old_path, registry, stats);
            }
            if event.processable {
                handle_create_or_modify(&event.path, registry, stats, tailer);
            }
        }
    }
}

fn worker_loop(
    bus: Arc<Bus<FsEvent>>,
    registry: Arc<FileStateRegistry>,
    stats: Arc<WorkerStats>,
    stopping: Arc<AtomicBool>,
    tailer: Box<dyn Tailer>,
    dequeue_timeout: Duration,
) {
    loop {
        match bus.try_dequeue(dequeue_timeout) {
            Some(event) => {
                handle_event(&event, &registry, &stats, tailer.as_ref());
                stats.ack_swap_if_requested();
            }
            None => {
                stats.ack_swap_if_requested();
            }
        }
        if stopping.load(Ordering::Acquire) && bus.depth() == 0 {
            break;
        }
    }
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let name = handle
        .thread()
        .name()
        .unwrap_or("tailtap-worker")
        .to_string();
    let (tx, rx) = crossbeam::channel::bounded(1);
    thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    if rx.recv_timeout(timeout).is_err() {
        log::warn!(
            "worker thread '{name}' did not exit within {timeout:?}; abandoning join and \
             continuing shutdown"
        );
    }
}

/// Owns the worker pool: spawns `workers` OS threads, each draining the
/// bus and routing events through the per-file gate, and tears them down
/// with a bounded join on `stop`.
pub struct Coordinator {
    stopping: Arc<AtomicBool>,
    worker_stats: Vec<Arc<WorkerStats>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stop_once: Once,
}

impl Coordinator {
    pub fn spawn(
        config: CoordinatorConfig,
        bus: Arc<Bus<FsEvent>>,
        registry: Arc<FileStateRegistry>,
    ) -> Self {
        let stopping = Arc::new(AtomicBool::new(false));
        let mut worker_stats = Vec::with_capacity(config.workers);
        let mut handles = Vec::with_capacity(config.workers);

        for id in 0..config.workers {
            let stats = Arc::new(WorkerStats::new());
            worker_stats.push(Arc::clone(&stats));
            let bus = Arc::clone(&bus);
            let registry = Arc::clone(&registry);
            let stopping = Arc::clone(&stopping);
            let tailer = (config.tailer_factory)();
            let dequeue_timeout = config.dequeue_timeout;

            let handle = thread::Builder::new()
                .name(format!("tailtap-worker-{id}"))
                .spawn(move || {
                    worker_loop(bus, registry, stats, stopping, tailer, dequeue_timeout);
                })
                .expect("failed to spawn tailtap worker thread");
            handles.push(handle);
        }

        Self {
            stopping,
            worker_stats,
            handles: Mutex::new(handles),
            stop_once: Once::new(),
        }
    }

    pub fn worker_stats(&self) -> &[Arc<WorkerStats>] {
        &self.worker_stats
    }

    /// Signals workers to stop once the bus drains, and joins each with a
    /// bounded wait. Safe to call more than once; only the first call acts.
    pub fn stop(&self, bus: &Bus<FsEvent>) {
        self.stop_once.call_once(|| {
            self.stopping.store(true, Ordering::Release);
            bus.stop();
            let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
            for handle in handles {
                join_with_timeout(handle, DEFAULT_JOIN_TIMEOUT);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tailer::{TailStatus, Tailer as TailerTrait};
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct NoopTailer;
    impl TailerTrait for NoopTailer {
        fn read_appended(
            &self,
            _path: &Path,
            _offset: &mut u64,
            _on_truncate: &mut dyn FnMut(),
            _on_chunk: &mut dyn FnMut(&[u8]),
        ) -> (TailStatus, u64) {
            (TailStatus::NoData, 0)
        }
    }

    #[test]
    fn processes_created_event_and_stops_cleanly() {
        let bus = Arc::new(Bus::new(16));
        let registry = Arc::new(FileStateRegistry::new());
        let tailers_built = Arc::new(AtomicU64::new(0));
        let tailers_built_clone = Arc::clone(&tailers_built);
        let config = CoordinatorConfig {
            workers: 2,
            dequeue_timeout: Duration::from_millis(20),
            tailer_factory: Arc::new(move || {
                tailers_built_clone.fetch_add(1, Ordering::Relaxed);
                Box::new(NoopTailer) as Box<dyn Tailer>
            }),
        };
        let coordinator = Coordinator::spawn(config, Arc::clone(&bus), Arc::clone(&registry));
        bus.publish(FsEvent::new(
            FsEventKind::Created,
            "/tmp/example.log".into(),
            true,
        ));
        thread::sleep(Duration::from_millis(100));
        for ws in coordinator.worker_stats() {
            ws.request_swap();
        }
        for ws in coordinator.worker_stats() {
            ws.wait_for_swap_ack(Duration::from_secs(1));
        }
        let total_created: u64 = coordinator
            .worker_stats()
            .iter()
            .map(|s| s.inactive().fs_created)
            .sum();
        assert_eq!(total_created, 1);
        coordinator.stop(&bus);
        assert_eq!(tailers_built.load(Ordering::Relaxed), 2);
    }
}

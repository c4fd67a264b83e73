use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use tailtap_core::{Bus, Coordinator, CoordinatorConfig, FileStateRegistry, FsEvent, FsTailer, Reporter, ReporterConfig, Tailer};
use tailtap_watch::{DirectoryWatcher, ExtensionPolicy};

use crate::cli::CliOptions;

/// Owns every long-lived piece wired together at startup, and tears them
/// down in the documented order: watcher, then bus, then worker pool, then
/// reporter. Shutdown is idempotent, guarded by a flag on the struct itself
/// rather than a process-global.
pub struct App {
    bus: Arc<Bus<FsEvent>>,
    coordinator: Coordinator,
    reporter: Reporter,
    watcher: Option<DirectoryWatcher>,
    shut_down: AtomicBool,
}

impl App {
    pub fn start(opts: &CliOptions) -> anyhow::Result<Self> {
        let workers = opts.resolved_workers();
        let chunk_size_bytes = opts.chunk_size_bytes;

        let bus = Arc::new(Bus::new(opts.queue_capacity));
        let registry = Arc::new(FileStateRegistry::new());

        let coordinator_config = CoordinatorConfig {
            workers,
            dequeue_timeout: Duration::from_millis(200),
            tailer_factory: Arc::new(move || Box::new(FsTailer::new(chunk_size_bytes)) as Box<dyn Tailer>),
        };
        let coordinator = Coordinator::spawn(coordinator_config, Arc::clone(&bus), Arc::clone(&registry));

        let reporter_config = ReporterConfig {
            interval: Duration::from_secs(opts.report_interval_seconds),
            topk: opts.topk,
            swap_ack_timeout: Duration::from_secs(2),
        };
        let reporter = Reporter::spawn(
            reporter_config,
            coordinator.worker_stats().to_vec(),
            Arc::clone(&bus),
            Box::new(std::io::stdout()),
        );

        let policy = ExtensionPolicy::new(opts.extension_list());
        let watcher = DirectoryWatcher::spawn(&opts.watch_path, policy, Arc::clone(&bus))
            .with_context(|| format!("failed to watch directory {}", opts.watch_path.display()))?;

        Ok(Self {
            bus,
            coordinator,
            reporter,
            watcher: Some(watcher),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn backend_errors(&self) -> u64 {
        self.watcher.as_ref().map(|w| w.backend_errors()).unwrap_or(0)
    }

    /// Idempotent, ordered shutdown: stop the watcher first so no new
    /// events arrive, then the bus, then the worker pool, then the
    /// reporter (which emits one best-effort final frame before exiting).
    pub fn shutdown(&mut self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.watcher.take();
        self.bus.stop();
        self.coordinator.stop(&self.bus);
        self.reporter.stop();
    }
}

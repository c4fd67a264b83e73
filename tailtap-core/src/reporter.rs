use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::bus::Bus;
use crate::fsevent::FsEvent;
use crate::histogram::LatencyHistogram;
use crate::parser::LogLevel;
use crate::stats::{WorkerStats, WorkerStatsBuffer};
use crate::topk::top_k;

/// The merged, finalized view of one reporting interval.
pub struct GlobalSnapshot {
    pub fs_created: u64,
    pub fs_modified: u64,
    pub fs_deleted: u64,
    pub fs_renamed: u64,
    pub lines_processed: u64,
    pub malformed_lines: u64,
    pub coalesced_due_to_busy_gate: u64,
    pub delete_pending_set: u64,
    pub skipped_due_to_delete_pending: u64,
    pub file_state_removed: u64,
    pub file_not_found: u64,
    pub access_denied: u64,
    pub io_exception: u64,
    pub truncation_reset: u64,
    pub level_counts: [u64; LogLevel::COUNT],
    pub message_counts: HashMap<Vec<u8>, u64>,
    pub histogram: LatencyHistogram,
    pub top_k: Vec<(Vec<u8>, u64)>,
    pub p50: Option<usize>,
    pub p95: Option<usize>,
    pub p99: Option<usize>,
    pub bus_published: u64,
    pub bus_dropped: u64,
    pub bus_depth: usize,
}

impl GlobalSnapshot {
    pub fn new() -> Self {
        Self {
            fs_created: 0,
            fs_modified: 0,
            fs_deleted: 0,
            fs_renamed: 0,
            lines_processed: 0,
            malformed_lines: 0,
            coalesced_due_to_busy_gate: 0,
            delete_pending_set: 0,
            skipped_due_to_delete_pending: 0,
            file_state_removed: 0,
            file_not_found: 0,
            access_denied: 0,
            io_exception: 0,
            truncation_reset: 0,
            level_counts: [0; LogLevel::COUNT],
            message_counts: HashMap::new(),
            histogram: LatencyHistogram::new(),
            top_k: Vec::new(),
            p50: None,
            p95: None,
            p99: None,
            bus_published: 0,
            bus_dropped: 0,
            bus_depth: 0,
        }
    }

    fn reset_for_next_merge(&mut self) {
        *self = GlobalSnapshot::new();
    }

    fn merge_buffer(&mut self, buf: &WorkerStatsBuffer) {
        self.fs_created += buf.fs_created;
        self.fs_modified += buf.fs_modified;
        self.fs_deleted += buf.fs_deleted;
        self.fs_renamed += buf.fs_renamed;
        self.lines_processed += buf.lines_processed;
        self.malformed_lines += buf.malformed_lines;
        self.coalesced_due_to_busy_gate += buf.coalesced_due_to_busy_gate;
        self.delete_pending_set += buf.delete_pending_set;
        self.skipped_due_to_delete_pending += buf.skipped_due_to_delete_pending;
        self.file_state_removed += buf.file_state_removed;
        self.file_not_found += buf.file_not_found;
        self.access_denied += buf.access_denied;
        self.io_exception += buf.io_exception;
        self.truncation_reset += buf.truncation_reset;
        for (i, c) in buf.level_counts.iter().enumerate() {
            self.level_counts[i] += c;
        }
        for (key, count) in &buf.message_counts {
            *self.message_counts.entry(key.clone()).or_insert(0) += count;
        }
        self.histogram.merge_from(&buf.histogram);
    }

    fn finalize(&mut self, topk: usize) {
        self.top_k = top_k(&self.message_counts, topk);
        self.p50 = self.histogram.percentile(0.50);
        self.p95 = self.histogram.percentile(0.95);
        self.p99 = self.histogram.percentile(0.99);
    }

    pub fn events_total(&self) -> u64 {
        self.fs_created + self.fs_modified + self.fs_deleted + self.fs_renamed
    }
}

impl Default for GlobalSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile_display(p: Option<usize>) -> String {
    match p {
        Some(v) if v == crate::histogram::OVERFLOW_BIN => ">10000".to_string(),
        Some(v) => v.to_string(),
        None => "n/a".to_string(),
    }
}

fn rate(total: u64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds <= 0.0 {
        0.0
    } else {
        total as f64 / elapsed_seconds
    }
}

/// Renders one report block in the documented stdout format.
pub fn format_report_frame(snapshot: &GlobalSnapshot, elapsed: Duration) -> String {
    let elapsed_seconds = elapsed.as_secs_f64();
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    let mut out = String::new();
    out.push_str(&format!("--- tailtap report @ {now} (elapsed {elapsed_seconds:.2}s) ---\n"));
    out.push_str(&format!(
        "fs events: created={} modified={} deleted={} renamed={} ({:.1}/s)\n",
        snapshot.fs_created,
        snapshot.fs_modified,
        snapshot.fs_deleted,
        snapshot.fs_renamed,
        rate(snapshot.events_total(), elapsed_seconds),
    ));
    out.push_str(&format!(
        "lines: processed={} malformed={} ({:.1}/s)\n",
        snapshot.lines_processed,
        snapshot.malformed_lines,
        rate(snapshot.lines_processed, elapsed_seconds),
    ));
    out.push_str(&format!(
        "levels: info={} warn={} error={} debug={} other={}\n",
        snapshot.level_counts[LogLevel::Info.index()],
        snapshot.level_counts[LogLevel::Warn.index()],
        snapshot.level_counts[LogLevel::Error.index()],
        snapshot.level_counts[LogLevel::Debug.index()],
        snapshot.level_counts[LogLevel::Other.index()],
    ));
    out.push_str(&format!(
        "latency ms: p50={} p95={} p99={} samples={}\n",
        percentile_display(snapshot.p50),
        percentile_display(snapshot.p95),
        percentile_display(snapshot.p99),
        snapshot.histogram.count(),
    ));
    out.push_str("top messages:\n");
    if snapshot.top_k.is_empty() {
        out.push_str("  (none)\n");
    } else {
        for (key, count) in &snapshot.top_k {
            out.push_str(&format!(
                "  {:>8}  {}\n",
                count,
                String::from_utf8_lossy(key)
            ));
        }
    }
    out.push_str(&format!(
        "gate: coalesced={} delete_pending_set={} file_state_removed={} skipped_due_to_delete_pending={}\n",
        snapshot.coalesced_due_to_busy_gate,
        snapshot.delete_pending_set,
        snapshot.file_state_removed,
        snapshot.skipped_due_to_delete_pending,
    ));
    out.push_str(&format!(
        "io: file_not_found={} access_denied={} io_exception={} truncation_reset={}\n",
        snapshot.file_not_found, snapshot.access_denied, snapshot.io_exception, snapshot.truncation_reset,
    ));
    out.push_str(&format!(
        "bus: published={} dropped={} depth={}\n",
        snapshot.bus_published, snapshot.bus_dropped, snapshot.bus_depth,
    ));
    out
}

pub struct ReporterConfig {
    pub interval: Duration,
    pub topk: usize,
    pub swap_ack_timeout: Duration,
}

fn wait_or_stop(interval: Duration, stop_flag: &AtomicBool) -> bool {
    const STEP: Duration = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < interval {
        if stop_flag.load(Ordering::Acquire) {
            return true;
        }
        let step = STEP.min(interval - waited);
        thread::sleep(step);
        waited += step;
    }
    stop_flag.load(Ordering::Acquire)
}

#[allow(clippy::too_many_arguments)]
fn emit_frame(
    worker_stats: &[Arc<WorkerStats>],
    bus: &Bus<FsEvent>,
    snapshot: &mut GlobalSnapshot,
    topk: usize,
    swap_ack_timeout: Duration,
    elapsed: Duration,
    sink: &mut dyn Write,
) {
    for ws in worker_stats {
        ws.request_swap();
    }
    // Waited on concurrently so a dead or slow worker costs at most one
    // `swap_ack_timeout` total, not one per worker.
    thread::scope(|scope| {
        for ws in worker_stats {
            scope.spawn(move || {
                if !ws.wait_for_swap_ack(swap_ack_timeout) {
                    log::warn!("swap-ack timed out for a worker; merging best-effort");
                }
            });
        }
    });

    snapshot.reset_for_next_merge();
    for ws in worker_stats {
        snapshot.merge_buffer(&ws.inactive());
    }
    snapshot.bus_published = bus.published();
    snapshot.bus_dropped = bus.dropped();
    snapshot.bus_depth = bus.depth();
    snapshot.finalize(topk);

    let frame = format_report_frame(snapshot, elapsed);
    let _ = write!(sink, "{frame}");
    let _ = sink.flush();
}

fn reporter_loop(
    config: ReporterConfig,
    worker_stats: Vec<Arc<WorkerStats>>,
    bus: Arc<Bus<FsEvent>>,
    stop_flag: Arc<AtomicBool>,
    mut sink: Box<dyn Write + Send>,
) {
    let mut snapshot = GlobalSnapshot::new();
    let mut last_tick = Instant::now();
    loop {
        if wait_or_stop(config.interval, &stop_flag) {
            break;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(last_tick);
        last_tick = now;
        emit_frame(
            &worker_stats,
            &bus,
            &mut snapshot,
            config.topk,
            config.swap_ack_timeout,
            elapsed,
            sink.as_mut(),
        );
    }
    emit_frame(
        &worker_stats,
        &bus,
        &mut snapshot,
        config.topk,
        config.swap_ack_timeout,
        Duration::ZERO,
        sink.as_mut(),
    );
}

/// Drives periodic reporting from its own thread until `stop` is called.
pub struct Reporter {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn spawn(
        config: ReporterConfig,
        worker_stats: Vec<Arc<WorkerStats>>,
        bus: Arc<Bus<FsEvent>>,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = Arc::clone(&stop_flag);
        let handle = thread::Builder::new()
            .name("tailtap-reporter".into())
            .spawn(move || reporter_loop(config, worker_stats, bus, stop_flag_clone, sink))
            .expect("failed to spawn tailtap reporter thread");
        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signals the reporter to emit one final frame and exit, then joins.
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

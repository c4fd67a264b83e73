use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use atomic_refcell::{AtomicRef, AtomicRefCell};

use crate::histogram::LatencyHistogram;
use crate::parser::LogLevel;

/// One worker's counters for the interval since its last swap. Reset to
/// zero whenever it becomes the new active buffer.
#[derive(Debug, Default)]
pub struct WorkerStatsBuffer {
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
}

impl WorkerStatsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = WorkerStatsBuffer::new();
    }

    pub fn record_level(&mut self, level: LogLevel) {
        self.level_counts[level.index()] += 1;
    }

    pub fn record_message(&mut self, key: &[u8]) {
        *self.message_counts.entry(key.to_vec()).or_insert(0) += 1;
    }
}

/// A reset-then-wait boolean latch: `reset` marks the next `signal` call as
/// pending, `wait` blocks (bounded) until that `signal` happens. Mirrors a
/// single-generation condition-variable handshake; at most one swap is ever
/// outstanding per worker, so no generation counter is needed.
struct SwapSignal {
    acked: Mutex<bool>,
    cond: Condvar,
}

impl SwapSignal {
    fn new() -> Self {
        Self {
            acked: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    fn reset(&self) {
        *self.acked.lock().unwrap() = false;
    }

    fn signal(&self) {
        *self.acked.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let acked = self.acked.lock().unwrap();
        let (acked, result) = self
            .cond
            .wait_timeout_while(acked, timeout, |a| !*a)
            .unwrap();
        *acked && !result.timed_out()
    }
}

/// Double-buffered per-worker statistics. The owning worker thread only
/// ever mutates the active buffer via `with_active`; the reporter only ever
/// reads the inactive buffer, and only after observing a completed swap.
pub struct WorkerStats {
    buffers: [AtomicRefCell<WorkerStatsBuffer>; 2],
    active_is_first: AtomicBool,
    swap_requested: AtomicBool,
    signal: SwapSignal,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            buffers: [
                AtomicRefCell::new(WorkerStatsBuffer::new()),
                AtomicRefCell::new(WorkerStatsBuffer::new()),
            ],
            active_is_first: AtomicBool::new(true),
            swap_requested: AtomicBool::new(false),
            signal: SwapSignal::new(),
        }
    }

    /// Runs `f` against the currently active buffer. Must only be called
    /// from the owning worker thread.
    pub fn with_active<R>(&self, f: impl FnOnce(&mut WorkerStatsBuffer) -> R) -> R {
        let idx = if self.active_is_first.load(Ordering::Acquire) {
            0
        } else {
            1
        };
        let mut guard = self.buffers[idx].borrow_mut();
        f(&mut guard)
    }

    /// Borrows the currently inactive buffer. Only valid for the reporter
    /// to call once `wait_for_swap_ack` has returned `true` for the
    /// corresponding `request_swap`.
    pub fn inactive(&self) -> AtomicRef<'_, WorkerStatsBuffer> {
        let idx = if self.active_is_first.load(Ordering::Acquire) {
            1
        } else {
            0
        };
        self.buffers[idx].borrow()
    }

    /// Called by the reporter to ask the worker to swap buffers at its next
    /// opportunity.
    pub fn request_swap(&self) {
        self.signal.reset();
        self.swap_requested.store(true, Ordering::Release);
    }

    /// Called by the reporter after `request_swap`; blocks up to `timeout`
    /// for the worker's ack.
    pub fn wait_for_swap_ack(&self, timeout: Duration) -> bool {
        self.signal.wait(timeout)
    }

    /// Called by the owning worker thread at a documented safe point. If a
    /// swap was requested, flips which buffer is active, resets the buffer
    /// that just became active, and signals the reporter.
    pub fn ack_swap_if_requested(&self) {
        if self.swap_requested.swap(false, Ordering::AcqRel) {
            let was_first = self.active_is_first.fetch_xor(true, Ordering::AcqRel);
            let new_active_idx = if was_first { 1 } else { 0 };
            self.buffers[new_active_idx].borrow_mut().reset();
            self.signal.signal();
        }
    }
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn swap_moves_active_writes_into_inactive_view() {
        let stats = WorkerStats::new();
        stats.with_active(|b| b.lines_processed = 5);
        stats.request_swap();
        stats.ack_swap_if_requested();
        assert!(stats.wait_for_swap_ack(Duration::from_millis(100)));
        assert_eq!(stats.inactive().lines_processed, 5);
        stats.with_active(|b| assert_eq!(b.lines_processed, 0));
    }

    #[test]
    fn ack_is_noop_without_a_pending_request() {
        let stats = WorkerStats::new();
        stats.with_active(|b| b.lines_processed = 1);
        stats.ack_swap_if_requested();
        stats.with_active(|b| assert_eq!(b.lines_processed, 1));
    }

    #[test]
    fn wait_for_swap_ack_times_out_without_an_ack() {
        let stats = WorkerStats::new();
        stats.request_swap();
        assert!(!stats.wait_for_swap_ack(Duration::from_millis(30)));
    }

    #[test]
    fn concurrent_request_and_ack_eventually_observe_each_other() {
        let stats = Arc::new(WorkerStats::new());
        let worker_side = Arc::clone(&stats);
        stats.with_active(|b| b.lines_processed = 9);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !worker_stop.load(Ordering::Acquire) {
                worker_side.ack_swap_if_requested();
                thread::sleep(Duration::from_millis(1));
            }
        });
        stats.request_swap();
        assert!(stats.wait_for_swap_ack(Duration::from_secs(2)));
        stop.store(true, Ordering::Release);
        handle.join().unwrap();
        assert_eq!(stats.inactive().lines_processed, 9);
    }
}

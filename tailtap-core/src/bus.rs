use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam::channel::{Select, Sender, TrySendError};

/// A bounded, multi-producer multi-consumer queue with drop-newest
/// backpressure.
///
/// `publish` never blocks: once the channel is at capacity, the new item is
/// discarded and counted rather than displacing anything already queued.
/// `try_dequeue` is a single bounded wait per call; `stop` wakes every
/// blocked consumer immediately, independent of how much of their timeout
/// remains, by closing a dedicated shutdown channel.
pub struct Bus<T> {
    sender: Sender<T>,
    receiver: crossbeam::channel::Receiver<T>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: crossbeam::channel::Receiver<()>,
    published: AtomicU64,
    dropped: AtomicU64,
    stopped: AtomicBool,
}

impl<T> Bus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(capacity);
        let (stop_tx, stop_rx) = crossbeam::channel::bounded(0);
        Self {
            sender,
            receiver,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Attempts to enqueue `item`. Returns `false` if the bus is stopped or
    /// at capacity; in the latter case the drop is counted.
    pub fn publish(&self, item: T) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        match self.sender.try_send(item) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Waits up to `timeout` for an item, or returns `None` on timeout or an
    /// empty, stopped bus. Items already queued are always drained first,
    /// even after `stop()` has been called.
    pub fn try_dequeue(&self, timeout: Duration) -> Option<T> {
        if let Ok(item) = self.receiver.try_recv() {
            return Some(item);
        }

        let mut select = Select::new();
        let recv_idx = select.recv(&self.receiver);
        let stop_idx = select.recv(&self.stop_rx);

        let oper = match select.select_timeout(timeout) {
            Ok(oper) => oper,
            Err(_) => return None,
        };

        if oper.index() == recv_idx {
            oper.recv(&self.receiver).ok()
        } else if oper.index() == stop_idx {
            let _ = oper.recv(&self.stop_rx);
            self.receiver.try_recv().ok()
        } else {
            unreachable!("select only registered two operations")
        }
    }

    /// Wakes every blocked `try_dequeue` call. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(tx) = self.stop_tx.lock().unwrap().take() {
            drop(tx);
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn depth(&self) -> usize {
        self.receiver.len()
    }
}

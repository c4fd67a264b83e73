use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Offset and carry buffer for one tracked file, reachable only through a
/// scoped, non-blocking acquisition (`try_acquire`).
struct FileStateInner {
    offset: u64,
    carry: Vec<u8>,
}

/// Per-file tracking state. `dirty` and `delete_pending` are plain atomics
/// so a worker that currently holds the gate can still be notified of new
/// activity without blocking the notifier.
pub struct FileState {
    pub generation: u32,
    inner: Mutex<FileStateInner>,
    dirty: AtomicBool,
    delete_pending: AtomicBool,
}

impl FileState {
    fn new(generation: u32) -> Self {
        Self {
            generation,
            inner: Mutex::new(FileStateInner {
                offset: 0,
                carry: Vec::new(),
            }),
            dirty: AtomicBool::new(false),
            delete_pending: AtomicBool::new(false),
        }
    }

    /// Tries to take the single-holder gate. Returns `None` immediately if
    /// another worker already holds it. A poisoned gate (the prior holder
    /// panicked mid-processing) is still recovered rather than left jammed
    /// forever, since the held data (offset/carry) remains structurally
    /// valid even after a panic partway through a read.
    pub fn try_acquire(&self) -> Option<FileStateGuard<'_>> {
        let guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => return None,
        };
        Some(FileStateGuard { state: self, guard })
    }

    /// Marks the file dirty unless a delete is already pending for it.
    pub fn mark_dirty_if_allowed(&self) {
        if !self.delete_pending.load(Ordering::Acquire) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    pub fn mark_delete_pending(&self) {
        self.delete_pending.store(true, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }

    pub fn is_delete_pending(&self) -> bool {
        self.delete_pending.load(Ordering::Acquire)
    }
}

/// RAII handle returned by `FileState::try_acquire`. Dropping it releases
/// the gate unconditionally, even if the holder panics mid-processing.
pub struct FileStateGuard<'a> {
    state: &'a FileState,
    guard: MutexGuard<'a, FileStateInner>,
}

impl FileStateGuard<'_> {
    pub fn offset(&self) -> u64 {
        self.guard.offset
    }

    pub fn set_offset(&mut self, value: u64) {
        self.guard.offset = value;
    }

    pub fn carry_mut(&mut self) -> &mut Vec<u8> {
        &mut self.guard.carry
    }

    pub fn is_delete_pending(&self) -> bool {
        self.state.is_delete_pending()
    }

    pub fn is_dirty(&self) -> bool {
        !self.state.is_delete_pending() && self.state.dirty.load(Ordering::Acquire)
    }

    pub fn clear_dirty(&self) {
        self.state.dirty.store(false, Ordering::Release);
    }

    pub fn generation(&self) -> u32 {
        self.state.generation
    }
}

struct RegistryInner {
    states: HashMap<PathBuf, Arc<FileState>>,
    epochs: HashMap<PathBuf, u32>,
}

/// Maps paths to their tracked state, and hands out a fresh, monotonically
/// increasing generation each time a path is (re)created after a prior
/// deletion.
pub struct FileStateRegistry {
    inner: Mutex<RegistryInner>,
}

impl FileStateRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                states: HashMap::new(),
                epochs: HashMap::new(),
            }),
        }
    }

    pub fn get_or_create(&self, path: &Path) -> Arc<FileState> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.states.get(path) {
            return Arc::clone(state);
        }
        let generation = inner.epochs.get(path).copied().unwrap_or(0) + 1;
        let state = Arc::new(FileState::new(generation));
        inner.states.insert(path.to_path_buf(), Arc::clone(&state));
        state
    }

    pub fn try_get(&self, path: &Path) -> Option<Arc<FileState>> {
        self.inner.lock().unwrap().states.get(path).cloned()
    }

    /// Removes the path's entry so a future create event starts a fresh
    /// generation. Bumps the epoch even if no entry currently exists, so a
    /// stray duplicate finalize never replays a stale generation.
    pub fn finalize_delete(&self, path: &Path) {
        let mut inner = self.inner.lock().unwrap();
        inner.states.remove(path);
        let epoch = inner.epochs.entry(path.to_path_buf()).or_insert(0);
        *epoch += 1;
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.lock().unwrap().states.len()
    }
}

impl Default for FileStateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_same_state_for_same_path() {
        let registry = FileStateRegistry::new();
        let path = Path::new("/tmp/a.log");
        let a = registry.get_or_create(path);
        let b = registry.get_or_create(path);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.generation, 1);
    }

    #[test]
    fn finalize_then_recreate_bumps_generation() {
        let registry = FileStateRegistry::new();
        let path = Path::new("/tmp/a.log");
        let first = registry.get_or_create(path);
        assert_eq!(first.generation, 1);
        registry.finalize_delete(path);
        assert!(registry.try_get(path).is_none());
        let second = registry.get_or_create(path);
        assert_eq!(second.generation, 2);
    }

    #[test]
    fn try_acquire_is_single_holder() {
        let registry = FileStateRegistry::new();
        let state = registry.get_or_create(Path::new("/tmp/a.log"));
        let guard1 = state.try_acquire().expect("first acquire succeeds");
        assert!(state.try_acquire().is_none());
        drop(guard1);
        assert!(state.try_acquire().is_some());
    }

    #[test]
    fn dirty_is_suppressed_once_delete_pending() {
        let registry = FileStateRegistry::new();
        let state = registry.get_or_create(Path::new("/tmp/a.log"));
        state.mark_delete_pending();
        state.mark_dirty_if_allowed();
        let guard = state.try_acquire().unwrap();
        assert!(!guard.is_dirty());
        assert!(guard.is_delete_pending());
    }

    #[test]
    fn offset_and_carry_persist_across_acquisitions() {
        let registry = FileStateRegistry::new();
        let state = registry.get_or_create(Path::new("/tmp/a.log"));
        {
            let mut guard = state.try_acquire().unwrap();
            guard.set_offset(128);
            guard.carry_mut().extend_from_slice(b"partial");
        }
        let guard = state.try_acquire().unwrap();
        assert_eq!(guard.offset(), 128);
        assert_eq!(guard.guard.carry, b"partial");
    }
}

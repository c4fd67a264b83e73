use std::path::PathBuf;
use std::time::SystemTime;

/// The kind of change a watcher observed on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// A single filesystem change as published onto the event bus.
///
/// `old_path` is only meaningful for `Renamed` events. `processable` is
/// decided once, at publish time, by whichever extension policy the watcher
/// was configured with, so workers never need to re-derive it.
#[derive(Debug, Clone)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
    pub observed_at: SystemTime,
    pub processable: bool,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: PathBuf, processable: bool) -> Self {
        Self {
            kind,
            path,
            old_path: None,
            observed_at: SystemTime::now(),
            processable,
        }
    }

    pub fn renamed(old_path: PathBuf, path: PathBuf, processable: bool) -> Self {
        Self {
            kind: FsEventKind::Renamed,
            path,
            old_path: Some(old_path),
            observed_at: SystemTime::now(),
            processable,
        }
    }
}

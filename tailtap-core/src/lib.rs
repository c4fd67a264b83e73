//! Core engine for tailing append-only log files and aggregating stats
//! across a pool of worker threads. This crate has no knowledge of how
//! filesystem events are produced; a watcher implementation publishes
//! `FsEvent`s onto a `Bus`, and the `Coordinator`/`Reporter` pair takes it
//! from there.

pub mod bus;
pub mod coordinator;
pub mod fsevent;
pub mod histogram;
pub mod parser;
pub mod processor;
pub mod registry;
pub mod reporter;
pub mod scanner;
pub mod stats;
pub mod tailer;
pub mod topk;

pub use bus::Bus;
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use fsevent::{FsEvent, FsEventKind};
pub use histogram::LatencyHistogram;
pub use parser::{parse_line, LogLevel, ParsedLine};
pub use registry::{FileState, FileStateGuard, FileStateRegistry};
pub use reporter::{format_report_frame, GlobalSnapshot, Reporter, ReporterConfig};
pub use stats::{WorkerStats, WorkerStatsBuffer};
pub use tailer::{FsTailer, TailStatus, Tailer};

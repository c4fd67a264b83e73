use std::cell::RefCell;
use std::path::Path;

use crate::parser::parse_line;
use crate::registry::FileStateGuard;
use crate::scanner::scan;
use crate::stats::WorkerStatsBuffer;
use crate::tailer::{TailStatus, Tailer};

/// Hands `offset`/`carry` back to the guard on drop, including on unwind, so
/// a panic partway through a read (e.g. inside `parse_line`) can't strand the
/// guard with `carry` permanently emptied by the `mem::take` below — the
/// next holder must still see whatever partial line was buffered before the
/// panic, not silently lose it.
struct Restore<'a, 'b> {
    guard: &'a mut FileStateGuard<'b>,
    carry: RefCell<Vec<u8>>,
    offset: u64,
}

impl Drop for Restore<'_, '_> {
    fn drop(&mut self) {
        *self.guard.carry_mut() = std::mem::take(self.carry.get_mut());
        self.guard.set_offset(self.offset);
    }
}

/// Reads whatever is newly appended to `path`, scans it into lines, parses
/// each line, and folds the results into `stats`. The caller must already
/// hold `guard`'s gate for the duration of the call.
///
/// `carry` is wrapped in a `RefCell` so the truncation and chunk callbacks
/// can each borrow it in turn: `read_appended` never calls them concurrently,
/// but the borrow checker can't see that, so a pair of plain `&mut` closures
/// over the same buffer wouldn't compile.
pub fn process_once(
    tailer: &dyn Tailer,
    path: &Path,
    guard: &mut FileStateGuard<'_>,
    stats: &mut WorkerStatsBuffer,
) {
    let mut restore = Restore {
        offset: guard.offset(),
        carry: RefCell::new(std::mem::take(guard.carry_mut())),
        guard,
    };

    let (status, _total_read) = tailer.read_appended(
        path,
        &mut restore.offset,
        &mut || restore.carry.borrow_mut().clear(),
        &mut |chunk| {
            scan(chunk, &mut restore.carry.borrow_mut(), |line| {
                stats.lines_processed += 1;
                match parse_line(line) {
                    Some(parsed) => {
                        stats.record_level(parsed.level);
                        stats.record_message(parsed.message_key);
                        if let Some(latency_ms) = parsed.latency_ms {
                            stats.histogram.add(latency_ms);
                        }
                    }
                    None => stats.malformed_lines += 1,
                }
            });
        },
    );

    match status {
        TailStatus::ReadSome | TailStatus::NoData => {}
        TailStatus::TruncatedReset => stats.truncation_reset += 1,
        TailStatus::FileNotFound => stats.file_not_found += 1,
        TailStatus::AccessDenied => stats.access_denied += 1,
        TailStatus::IoError => stats.io_exception += 1,
    }
}

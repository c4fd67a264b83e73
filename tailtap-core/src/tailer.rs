use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Outcome of one `read_appended` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailStatus {
    /// Appended bytes were read normally.
    ReadSome,
    /// No new bytes were available at the current offset.
    NoData,
    /// The file shrank since the last read; the offset was reset to 0.
    TruncatedReset,
    /// The path no longer exists.
    FileNotFound,
    /// The path exists but couldn't be opened or read.
    AccessDenied,
    /// Any other I/O failure.
    IoError,
}

/// Reads bytes appended to a file since a given offset. Implementations own
/// whatever scratch buffer they need so repeated calls don't allocate.
pub trait Tailer: Send {
    /// Reads everything appended since `*offset`, calling `on_chunk` once
    /// per internally-sized read. On return, `*offset` holds the position
    /// the next call should resume from (unchanged if nothing was read and
    /// no truncation occurred).
    ///
    /// If the file has shrunk below `*offset` since the last call, `on_truncate`
    /// is invoked exactly once, before any `on_chunk` call, against the same
    /// stat that decided the reset — so callers can discard stale carried
    /// partial-line bytes without a second, racing stat of their own.
    fn read_appended(
        &self,
        path: &Path,
        offset: &mut u64,
        on_truncate: &mut dyn FnMut(),
        on_chunk: &mut dyn FnMut(&[u8]),
    ) -> (TailStatus, u64);
}

/// Filesystem-backed `Tailer` with a single reused read buffer.
pub struct FsTailer {
    buffer: RefCell<Vec<u8>>,
}

impl FsTailer {
    pub fn new(chunk_size_bytes: usize) -> Self {
        Self {
            buffer: RefCell::new(vec![0u8; chunk_size_bytes.max(1)]),
        }
    }

    fn map_open_error(err: &io::Error) -> TailStatus {
        match err.kind() {
            io::ErrorKind::NotFound => TailStatus::FileNotFound,
            io::ErrorKind::PermissionDenied => TailStatus::AccessDenied,
            _ => TailStatus::IoError,
        }
    }
}

impl Tailer for FsTailer {
    fn read_appended(
        &self,
        path: &Path,
        offset: &mut u64,
        on_truncate: &mut dyn FnMut(),
        on_chunk: &mut dyn FnMut(&[u8]),
    ) -> (TailStatus, u64) {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => return (Self::map_open_error(&e), 0),
        };
        let length = match file.metadata() {
            Ok(m) => m.len(),
            Err(e) => return (Self::map_open_error(&e), 0),
        };

        let truncated = length < *offset;
        if truncated {
            on_truncate();
        }
        let effective_offset = if truncated { 0 } else { *offset };

        if effective_offset >= length {
            *offset = effective_offset;
            let status = if truncated {
                TailStatus::TruncatedReset
            } else {
                TailStatus::NoData
            };
            return (status, 0);
        }

        if let Err(e) = file.seek(SeekFrom::Start(effective_offset)) {
            return (Self::map_open_error(&e), 0);
        }

        let mut buffer = self.buffer.borrow_mut();
        let mut total_read: u64 = 0;
        loop {
            match file.read(&mut buffer[..]) {
                Ok(0) => break,
                Ok(n) => {
                    on_chunk(&buffer[..n]);
                    total_read += n as u64;
                }
                Err(_) => return (TailStatus::IoError, total_read),
            }
        }

        *offset = effective_offset + total_read;
        let status = if truncated {
            TailStatus::TruncatedReset
        } else {
            TailStatus::ReadSome
        };
        (status, total_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_appended_bytes_and_advances_offset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello ").unwrap();
        file.flush().unwrap();
        let tailer = FsTailer::new(64);
        let mut offset = 0u64;
        let mut collected = Vec::new();
        let (status, n) = tailer.read_appended(file.path(), &mut offset, &mut || {}, &mut |c| {
            collected.extend_from_slice(c)
        });
        assert_eq!(status, TailStatus::ReadSome);
        assert_eq!(n, 6);
        assert_eq!(collected, b"hello ");
        assert_eq!(offset, 6);

        file.write_all(b"world").unwrap();
        file.flush().unwrap();
        collected.clear();
        let (status, n) = tailer.read_appended(file.path(), &mut offset, &mut || {}, &mut |c| {
            collected.extend_from_slice(c)
        });
        assert_eq!(status, TailStatus::ReadSome);
        assert_eq!(n, 5);
        assert_eq!(collected, b"world");
        assert_eq!(offset, 11);
    }

    #[test]
    fn no_data_when_offset_is_caught_up() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let tailer = FsTailer::new(64);
        let mut offset = 0u64;
        let (status, n) = tailer.read_appended(file.path(), &mut offset, &mut || {}, &mut |_| {});
        assert_eq!(status, TailStatus::NoData);
        assert_eq!(n, 0);
    }

    #[test]
    fn truncation_resets_offset_to_zero_and_fires_on_truncate_before_any_chunk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();
        let tailer = FsTailer::new(64);
        let mut offset = 10u64;
        file.as_file().set_len(3).unwrap();
        let mut truncate_fired_before_chunk = false;
        let mut saw_chunk = false;
        let (status, n) = tailer.read_appended(
            file.path(),
            &mut offset,
            &mut || truncate_fired_before_chunk = !saw_chunk,
            &mut |_| saw_chunk = true,
        );
        assert_eq!(status, TailStatus::TruncatedReset);
        assert_eq!(n, 3);
        assert_eq!(offset, 3);
        assert!(truncate_fired_before_chunk);
    }

    #[test]
    fn on_truncate_is_not_called_when_file_has_not_shrunk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();
        let tailer = FsTailer::new(64);
        let mut offset = 5u64;
        let mut truncate_called = false;
        tailer.read_appended(file.path(), &mut offset, &mut || truncate_called = true, &mut |_| {});
        assert!(!truncate_called);
    }

    #[test]
    fn missing_file_is_reported_as_file_not_found() {
        let tailer = FsTailer::new(64);
        let mut offset = 0u64;
        let (status, _) = tailer.read_appended(
            Path::new("/nonexistent/path/does-not-exist.log"),
            &mut offset,
            &mut || {},
            &mut |_| {},
        );
        assert_eq!(status, TailStatus::FileNotFound);
    }

    #[test]
    fn reads_spanning_multiple_internal_chunks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![b'x'; 10]).unwrap();
        file.flush().unwrap();
        let tailer = FsTailer::new(4);
        let mut offset = 0u64;
        let mut chunk_count = 0;
        let mut total = 0;
        let (status, n) = tailer.read_appended(file.path(), &mut offset, &mut || {}, &mut |c| {
            chunk_count += 1;
            total += c.len();
        });
        assert_eq!(status, TailStatus::ReadSome);
        assert_eq!(n, 10);
        assert_eq!(total, 10);
        assert!(chunk_count >= 3);
    }
}

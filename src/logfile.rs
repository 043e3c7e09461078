//! Logfile acquisition policy and the append sink.
//!
//! The logfile usually lives on a partition that is not mounted when the
//! daemon starts, so opening it is retried once per loop iteration until it
//! works. Failure to open is never fatal; captured bytes wait in the ring
//! buffer meanwhile.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::filter::{ctime_now, EscapeFilter};

/// Decides, once per loop iteration, whether the logfile can be opened now.
pub struct LogPolicy {
    path: PathBuf,
    rotate: bool,
    create: bool,
}

impl LogPolicy {
    pub fn new(path: PathBuf, rotate: bool, create: bool) -> Self {
        Self {
            path,
            rotate,
            create,
        }
    }

    /// Try to produce a writable append handle.
    ///
    /// - If the path exists, rotate it to `<path>~` first when rotation was
    ///   requested (once), then open for append.
    /// - If the path does not exist, open-and-create only when `create` was
    ///   requested.
    /// - Otherwise the storage is not there yet; answer `None` and let the
    ///   caller ask again next iteration.
    pub fn try_open(&mut self) -> Option<File> {
        if self.path.exists() {
            if self.rotate {
                self.rotate = false;
                let mut backup = self.path.clone().into_os_string();
                backup.push("~");
                if let Err(e) = fs::rename(&self.path, &backup) {
                    warn!(logfile = %self.path.display(), error = %e, "rotating logfile failed");
                }
            }
            return self.open_append();
        }
        if self.create {
            return self.open_append();
        }
        None
    }

    fn open_append(&self) -> Option<File> {
        match OpenOptions::new().append(true).create(true).open(&self.path) {
            Ok(file) => {
                info!(logfile = %self.path.display(), "logfile opened");
                Some(file)
            }
            Err(e) => {
                warn!(logfile = %self.path.display(), error = %e, "opening logfile failed");
                None
            }
        }
    }
}

/// The open logfile, buffered, with enough bookkeeping to close it cleanly.
pub struct LogSink {
    file: BufWriter<File>,
    /// Last byte that reached the file; starts as a newline so an empty log
    /// is not given a stray one at close.
    last_byte: u8,
    sync_each_line: bool,
}

impl LogSink {
    pub fn new(file: File, sync_each_line: bool) -> Self {
        Self {
            file: BufWriter::new(file),
            last_byte: b'\n',
            sync_each_line,
        }
    }

    /// Run `bytes` through the escape filter into the file. Lines that got a
    /// timestamp are flushed immediately (and synced in `-s` mode) so the
    /// log survives a crash mid-boot.
    pub fn persist(&mut self, filter: &mut EscapeFilter, bytes: &[u8]) -> io::Result<()> {
        self.persist_with(filter, bytes, ctime_now)
    }

    pub fn persist_with(
        &mut self,
        filter: &mut EscapeFilter,
        bytes: &[u8],
        now: impl FnMut() -> String,
    ) -> io::Result<()> {
        let mut out = TrackLast {
            inner: &mut self.file,
            last: &mut self.last_byte,
        };
        let stamped = filter.feed(bytes, &mut out, now)?;
        if stamped {
            self.file.flush()?;
            if self.sync_each_line {
                self.file.get_ref().sync_data()?;
            }
        }
        Ok(())
    }

    /// Terminate the stream with a newline if it does not already end on
    /// one, then flush everything out.
    pub fn close(mut self) -> io::Result<()> {
        if self.last_byte != b'\n' {
            self.file.write_all(b"\n")?;
        }
        self.file.flush()?;
        if self.sync_each_line {
            self.file.get_ref().sync_data()?;
        }
        Ok(())
    }
}

/// Write adapter remembering the last byte that went through.
struct TrackLast<'a, W: Write> {
    inner: &'a mut W,
    last: &'a mut u8,
}

impl<W: Write> Write for TrackLast<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            *self.last = buf[n - 1];
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STAMP: &str = "Thu Jan  1 00:00:00 1970";

    #[test]
    fn missing_file_without_create_stays_closed() {
        let dir = tempdir().unwrap();
        let mut policy = LogPolicy::new(dir.path().join("boot.log"), false, false);
        assert!(policy.try_open().is_none());
    }

    #[test]
    fn create_flag_opens_a_fresh_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boot.log");
        let mut policy = LogPolicy::new(path.clone(), false, true);
        assert!(policy.try_open().is_some());
        assert!(path.exists());
    }

    #[test]
    fn existing_file_opens_for_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boot.log");
        fs::write(&path, "earlier\n").unwrap();
        let mut policy = LogPolicy::new(path.clone(), false, false);
        let mut file = policy.try_open().unwrap();
        file.write_all(b"later\n").unwrap();
        drop(file);
        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }

    #[test]
    fn rotation_moves_the_old_log_aside_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boot.log");
        let backup = dir.path().join("boot.log~");
        fs::write(&path, "previous boot\n").unwrap();

        let mut policy = LogPolicy::new(path.clone(), true, false);
        let file = policy.try_open().unwrap();
        drop(file);
        assert_eq!(fs::read_to_string(&backup).unwrap(), "previous boot\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        // A second open must not rotate the new log away.
        fs::write(&path, "this boot\n").unwrap();
        assert!(policy.try_open().is_some());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "previous boot\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "this boot\n");
    }

    #[test]
    fn sink_appends_missing_trailing_newline_at_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boot.log");
        let mut policy = LogPolicy::new(path.clone(), false, true);
        let mut sink = LogSink::new(policy.try_open().unwrap(), false);
        let mut filter = EscapeFilter::new();
        sink.persist_with(&mut filter, b"no newline", || STAMP.to_string())
            .unwrap();
        sink.close().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{STAMP}: no newline\n")
        );
    }

    #[test]
    fn sink_leaves_a_complete_final_line_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boot.log");
        let mut policy = LogPolicy::new(path.clone(), false, true);
        let mut sink = LogSink::new(policy.try_open().unwrap(), false);
        let mut filter = EscapeFilter::new();
        sink.persist_with(&mut filter, b"done\n", || STAMP.to_string())
            .unwrap();
        sink.close().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{STAMP}: done\n")
        );
    }

    #[test]
    fn empty_sink_closes_without_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boot.log");
        let mut policy = LogPolicy::new(path.clone(), false, true);
        let sink = LogSink::new(policy.try_open().unwrap(), false);
        sink.close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn stamped_lines_are_flushed_promptly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("boot.log");
        let mut policy = LogPolicy::new(path.clone(), false, true);
        let mut sink = LogSink::new(policy.try_open().unwrap(), false);
        let mut filter = EscapeFilter::new();
        sink.persist_with(&mut filter, b"visible\n", || STAMP.to_string())
            .unwrap();
        // Not closed yet, but the line must already be on disk.
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{STAMP}: visible\n")
        );
        sink.close().unwrap();
    }
}

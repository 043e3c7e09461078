//! Replay of captured bytes to every live console device.
//!
//! A console can disappear at runtime: when a getty takes over a tty that
//! was serving as console, our file descriptor gets hung up and writes fail
//! with EIO. That specific error is survivable — reopen the same path and
//! carry on. Anything else permanently drops the device.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;

use tracing::warn;

/// One fan-out destination. Trait seam so the recovery logic is testable
/// without real terminal devices.
pub trait ConsolePort {
    fn name(&self) -> &str;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    /// Reacquire the device after a hangup, replacing the stale handle.
    fn reopen(&mut self) -> io::Result<()>;
}

/// A real console device, opened for writing.
pub struct TtyPort {
    path: String,
    file: File,
}

impl TtyPort {
    pub fn open(path: &str) -> io::Result<Self> {
        Ok(Self {
            path: path.to_string(),
            file: open_console(path)?,
        })
    }
}

impl ConsolePort for TtyPort {
    fn name(&self) -> &str {
        &self.path
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.file = open_console(&self.path)?;
        Ok(())
    }
}

/// Open a console device for writing without becoming its controlling
/// terminal and without blocking on carrier detect, then demote the
/// descriptor to blocking for the actual writes.
fn open_console(path: &str) -> io::Result<File> {
    let file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
        .open(path)?;
    let fd = file.as_raw_fd();
    // Errors here are ignored, as the original open flags still work.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags >= 0 {
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    }
    Ok(file)
}

/// The set of live console destinations.
pub struct Fanout<P: ConsolePort> {
    ports: Vec<P>,
}

impl<P: ConsolePort> Fanout<P> {
    pub fn new(ports: Vec<P>) -> Self {
        Self { ports }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Write `bytes` in full to every live port, dropping ports that fail
    /// unrecoverably. Returns the number of ports still live.
    pub fn broadcast(&mut self, bytes: &[u8]) -> usize {
        self.ports.retain_mut(|port| deliver(port, bytes));
        self.ports.len()
    }
}

/// Write all of `bytes` to one port, retrying partial writes and recovering
/// from hangup. Returns false when the port should be dropped.
fn deliver<P: ConsolePort>(port: &mut P, mut bytes: &[u8]) -> bool {
    while !bytes.is_empty() {
        match port.write(bytes) {
            Ok(0) => {
                warn!(console = port.name(), "console accepts no more data, dropping it");
                return false;
            }
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                // The line was hung up under us; try to take it back.
                if let Err(e) = port.reopen() {
                    warn!(
                        console = port.name(),
                        error = %e,
                        "console hung up and could not be reopened"
                    );
                    return false;
                }
            }
            Err(e) => {
                warn!(console = port.name(), error = %e, "writing to console failed");
                return false;
            }
        }
    }
    true
}

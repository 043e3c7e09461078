//! Intercept terminal acquisition and console redirection.
//!
//! The daemon owns a pty pair for its whole lifetime: the follower side is
//! installed as the kernel console via TIOCCONS, and everything the kernel
//! prints then shows up on the controller side for capture.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::pty::{openpty, Winsize};
use nix::sys::termios::Termios;
use nix::unistd::ttyname;
use tracing::debug;

use crate::error::StartupError;

pub struct ConsoleRelay {
    /// Read side; the event loop polls and drains this.
    controller: File,
    /// Kept open for the process lifetime — the kernel writes console
    /// output here once installed.
    follower: File,
    follower_path: PathBuf,
}

impl ConsoleRelay {
    /// Obtain a controller/follower terminal pair.
    ///
    /// openpty can fail at very early boot while /dev/pts is not mounted
    /// yet, so exhaustively walking the legacy BSD pty names is kept as a
    /// fallback.
    pub fn acquire() -> Result<Self, StartupError> {
        if let Ok(pair) = openpty(None::<&Winsize>, None::<&Termios>) {
            if let Ok(path) = ttyname(&pair.slave) {
                return Ok(Self {
                    controller: File::from(pair.master),
                    follower: File::from(pair.slave),
                    follower_path: path,
                });
            }
        }
        Self::acquire_legacy()
    }

    fn acquire_legacy() -> Result<Self, StartupError> {
        for bank in b'p'..=b'z' {
            for index in b"0123456789abcdef" {
                let controller_path =
                    format!("/dev/pty{}{}", bank as char, *index as char);
                let follower_path =
                    format!("/dev/tty{}{}", bank as char, *index as char);
                let Ok(controller) = open_rw_noctty(&controller_path) else {
                    continue;
                };
                let Ok(follower) = open_rw_noctty(&follower_path) else {
                    continue;
                };
                debug!(pair = %follower_path, "using legacy pty pair");
                return Ok(Self {
                    controller,
                    follower,
                    follower_path: follower_path.into(),
                });
            }
        }
        Err(StartupError::RelayExhausted)
    }

    /// Ask the kernel to route console output into our follower terminal.
    ///
    /// Any existing redirect is cleared first — on the current controlling
    /// terminal, and on /dev/tty0 as well, where 2.1/2.2-era kernels left
    /// the console flag behind.
    pub fn install_as_console(&self) -> Result<(), StartupError> {
        unsafe {
            libc::ioctl(libc::STDIN_FILENO, libc::TIOCCONS);
        }
        if let Ok(vc) = OpenOptions::new().read(true).write(true).open("/dev/tty0") {
            unsafe {
                libc::ioctl(vc.as_raw_fd(), libc::TIOCCONS);
            }
        }
        let rc = unsafe { libc::ioctl(self.follower.as_raw_fd(), libc::TIOCCONS) };
        if rc < 0 {
            return Err(StartupError::ConsoleInstall {
                path: self.follower_path.clone(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn controller(&mut self) -> &mut File {
        &mut self.controller
    }

    pub fn controller_fd(&self) -> BorrowedFd<'_> {
        self.controller.as_fd()
    }

    pub fn follower_path(&self) -> &Path {
        &self.follower_path
    }
}

fn open_rw_noctty(path: &str) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn acquired_pair_relays_bytes_follower_to_controller() {
        let mut relay = ConsoleRelay::acquire().unwrap();
        assert!(relay.follower_path().starts_with("/dev"));

        let mut follower = OpenOptions::new()
            .read(true)
            .write(true)
            .open(relay.follower_path())
            .unwrap();
        follower.write_all(b"probe").unwrap();
        follower.flush().unwrap();

        let mut buf = [0u8; 64];
        let n = relay.controller().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"probe");
    }
}

//! Fatal startup failures.
//!
//! Everything here aborts the process with exit code 1 before the capture
//! loop starts; runtime trouble (device hangup, missing logfile) is handled
//! where it occurs and never surfaces as one of these.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    /// `/proc` was not mounted yet and mounting it ourselves failed.
    #[error("cannot mount /proc to read the kernel command line: {0}")]
    ProcMount(#[source] io::Error),

    /// The kernel command line could not be read.
    #[error("cannot read kernel command line: {0}")]
    Cmdline(#[source] io::Error),

    /// No `console=` token resolved and no default device probed.
    #[error("cannot deduce real console device")]
    NoConsole,

    /// Consoles were discovered but none could be opened for writing.
    #[error("no console device could be opened")]
    NoWritableConsole,

    /// Neither openpty nor the legacy pty/tty pair enumeration produced a
    /// usable intercept pair.
    #[error("cannot allocate pseudo tty")]
    RelayExhausted,

    /// The kernel refused to route console output to our follower terminal.
    #[error("cannot install {path} as the system console: {source}")]
    ConsoleInstall {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

//! bootlogd — boot-time console mirroring.
//!
//! Captures everything the kernel writes to the system console during early
//! boot by interposing a pty via TIOCCONS, replays it to the real console
//! device(s), and persists a timestamped, escape-stripped copy to a logfile
//! as soon as its storage is available.

pub mod cli;
pub mod console;
pub mod daemon;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod logfile;
pub mod relay;
pub mod ring;
pub mod shutdown;

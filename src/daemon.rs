//! The capture loop.
//!
//! Single-threaded: waits (bounded) for bytes on the intercept terminal,
//! mirrors them to the real consoles, parks them in the ring buffer, and
//! drains the buffer into the logfile once that can be opened. One iteration
//! runs to completion before the shutdown flag is consulted again.

use std::io::{self, Read};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::warn;

use crate::fanout::{ConsolePort, Fanout};
use crate::filter::EscapeFilter;
use crate::logfile::{LogPolicy, LogSink};
use crate::relay::ConsoleRelay;
use crate::ring::RingBuffer;
use crate::shutdown::ShutdownFlag;

/// How long one iteration waits for console traffic. Short, so a pending
/// logfile open is retried promptly even on a silent console.
pub const POLL_INTERVAL_MS: u16 = 500;

pub struct Daemon<P: ConsolePort> {
    relay: ConsoleRelay,
    consoles: Fanout<P>,
    ring: RingBuffer,
    filter: EscapeFilter,
    policy: LogPolicy,
    sink: Option<LogSink>,
    shutdown: ShutdownFlag,
    sync_each_line: bool,
}

impl<P: ConsolePort> Daemon<P> {
    pub fn new(
        relay: ConsoleRelay,
        consoles: Fanout<P>,
        policy: LogPolicy,
        shutdown: ShutdownFlag,
        sync_each_line: bool,
    ) -> Self {
        Self {
            relay,
            consoles,
            ring: RingBuffer::new(),
            filter: EscapeFilter::new(),
            policy,
            sink: None,
            shutdown,
            sync_each_line,
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        while !self.shutdown.raised() {
            self.run_once()?;
        }
        self.finish();
        Ok(())
    }

    /// One loop iteration: bounded wait for traffic, then the logfile side.
    pub fn run_once(&mut self) -> io::Result<()> {
        if self.wait_readable()? {
            self.capture();
        }
        self.drain_to_logfile();
        Ok(())
    }

    fn wait_readable(&mut self) -> io::Result<bool> {
        let mut fds = [PollFd::new(self.relay.controller_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(fds[0].revents().is_some_and(|r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            })),
            // A signal landing mid-wait just ends the wait early; the loop
            // condition picks the flag up.
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    /// Read what fits into the ring's contiguous tail, mirror it to the real
    /// consoles, and account for it in the buffer.
    fn capture(&mut self) {
        let slot = self.ring.write_slot();
        let n = match self.relay.controller().read(slot) {
            Ok(0) => return,
            Ok(n) => n,
            // Transient pty hiccup; next poll decides whether it persists.
            Err(_) => return,
        };
        let live = self.consoles.broadcast(&slot[..n]);
        if live == 0 {
            warn!("all console devices lost, shutting down");
            self.shutdown.raise();
        }
        self.ring.commit(n);
    }

    fn drain_to_logfile(&mut self) {
        if self.sink.is_none() {
            self.sink = self
                .policy
                .try_open()
                .map(|file| LogSink::new(file, self.sync_each_line));
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let (head, tail) = self.ring.readable();
        if head.is_empty() {
            return;
        }
        let drained = head.len() + tail.len();
        let result = sink
            .persist(&mut self.filter, head)
            .and_then(|()| sink.persist(&mut self.filter, tail));
        // Drained bytes are consumed either way; a dead sink gets dropped
        // and the open policy may produce a fresh one later.
        self.ring.advance_read(drained);
        if let Err(e) = result {
            warn!(error = %e, "writing to logfile failed, closing it");
            self.sink = None;
        }
    }

    fn finish(&mut self) {
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                warn!(error = %e, "closing logfile failed");
            }
        }
        // The relay pair and the console ports close on drop.
    }
}

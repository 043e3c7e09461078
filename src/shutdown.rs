//! Cooperative shutdown flag.
//!
//! Signal handlers only record receipt; the event loop polls the flag once
//! per iteration, so whatever write or drain is in progress finishes before
//! the process exits.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};

#[derive(Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Request shutdown, same as receiving a termination signal. Used by the
    /// loop itself when the last console is lost.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Route SIGTERM/SIGQUIT/SIGINT onto the flag, and make the process
    /// immune to job-control stops for its lifetime.
    pub fn install_handlers(&self) -> io::Result<()> {
        for sig in [SIGTERM, SIGQUIT, SIGINT] {
            signal_hook::flag::register(sig, Arc::clone(&self.0))?;
        }
        for sig in [libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU] {
            unsafe {
                libc::signal(sig, libc::SIG_IGN);
            }
        }
        Ok(())
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

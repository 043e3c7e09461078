use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bootlogd::cli::Cli;
use bootlogd::console;
use bootlogd::daemon::Daemon;
use bootlogd::error::StartupError;
use bootlogd::fanout::{Fanout, TtyPort};
use bootlogd::logfile::LogPolicy;
use bootlogd::relay::ConsoleRelay;
use bootlogd::shutdown::ShutdownFlag;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let shutdown = ShutdownFlag::new();
    shutdown
        .install_handlers()
        .context("installing signal handlers")?;

    let devices = console::discover()?;
    let mut ports = Vec::new();
    for path in &devices {
        match TtyPort::open(path) {
            Ok(port) => ports.push(port),
            // A console that is listed but won't open is excluded; the rest
            // still get the output.
            Err(e) => warn!(console = path.as_str(), error = %e, "cannot open console"),
        }
    }
    if ports.is_empty() {
        return Err(StartupError::NoWritableConsole.into());
    }
    let consoles = Fanout::new(ports);
    info!(consoles = consoles.len(), "mirroring to real console(s)");

    let relay = ConsoleRelay::acquire()?;
    relay.install_as_console()?;
    info!(follower = %relay.follower_path().display(), "console output redirected");

    let policy = LogPolicy::new(cli.logfile, cli.rotate, cli.create);
    let mut daemon = Daemon::new(relay, consoles, policy, shutdown, cli.sync_each_line);
    daemon.run().context("capture loop failed")?;
    Ok(())
}

/// Diagnostics go to stderr: stdout may not even exist in stage 1, and the
/// fmt output must stay readable on a dumb console.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

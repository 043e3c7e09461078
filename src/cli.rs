//! Command-line options. Resolved once before the loop starts.

use std::path::PathBuf;

use clap::Parser;

/// Where the log goes when `-l` is not given. /run is a tmpfs that exists
/// from the very start of boot; the file is picked up and preserved by
/// whatever collects stage-1 logs later.
pub const DEFAULT_LOGFILE: &str = "/run/log/stage-1.log";

/// Record console output during bootup into a logfile.
#[derive(Debug, Parser)]
#[command(name = "bootlogd", version)]
pub struct Cli {
    /// Log to this file.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_LOGFILE)]
    pub logfile: PathBuf,

    /// Rotate an existing logfile to FILE~ before writing.
    #[arg(short, long)]
    pub rotate: bool,

    /// Create the logfile if it does not exist yet.
    #[arg(short, long)]
    pub create: bool,

    /// Flush and sync the logfile to disk after every line.
    #[arg(short, long)]
    pub sync_each_line: bool,
}

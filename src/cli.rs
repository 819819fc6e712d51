//! Command-line surface. `spec.md` §1 lists the CLI flag surface as an
//! external interface, out of scope for the decision engine proper — this
//! stays a thin `clap::Parser` derive, grounded on the teacher's own
//! `clap::Parser` usage, with no logic beyond naming the inputs `main.rs`
//! wires together.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "lbhealthd")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Health-check driver for an IP-level load balancer")]
pub struct Cli {
    /// Path to the pool configuration document (TOML, `spec.md` §6).
    #[arg(short = 'c', long = "config", default_value = "/etc/lbhealthd/config.toml")]
    pub config: PathBuf,

    /// Path to the status file rewritten every 5 seconds for monitoring.
    #[arg(long = "status-file", default_value = "/var/run/lbhealthd/status.txt")]
    pub status_file: PathBuf,

    /// Path to the JSONL log file.
    #[arg(long = "log-file", default_value = "/var/log/lbhealthd/lbhealthd.jsonl")]
    pub log_file: PathBuf,

    /// Path to a PID file; written on startup, removed on clean exit.
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,

    /// Increase log verbosity; repeatable. Without it, only `info` grade
    /// and above (state changes, warnings, fatal errors) are logged; with
    /// it, `debug`-grade subsystem-stall/retry narration is included too.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

//! Error grades for the driver, per the three-tier error handling design:
//! probe-local failure, subsystem stall, and fatal invariant violation.
//!
//! Probe-local failures stay as `Outcome::Fail`/`Outcome::Panic` values in
//! `core::probe` rather than a dedicated error enum here — they never
//! escape the scheduler, which already carries the pool/node/probe context
//! needed to log them. The two error grades that do cross a module
//! boundary as `Result`s (config validation, subsystem stalls) are below;
//! both carry the pool/node context `Display` needs to stay
//! machine-parseable from the JSONL log.

/// Fatal invariant violations exit the process with a distinguishable code
/// so a supervisor can tell "we chose to stop" from "we crashed".
pub const EXIT_OK: i32 = 0;
pub const EXIT_PANIC: i32 = 2;
pub const EXIT_FATAL: i32 = 3;
pub const EXIT_WORKER_LOST: i32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config validation error: {0}")]
    Invalid(String),
}

/// Subsystem stalls: not fatal, retried on the next change or tick.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker channel full for pool {pool}")]
    ChannelFull { pool: String },
    #[error("worker process is gone")]
    Lost,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("filter command `{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
}

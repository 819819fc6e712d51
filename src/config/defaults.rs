//! Defaults for every tunable named in the configuration schema.
//!
//! Kept as plain constants rather than environment-variable overrides,
//! matching how the rest of this crate treats tunables that are operator
//! input, not deployment detail.

use std::time::Duration;

/// Scheduler tick rate (~10 Hz).
pub const SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// Status file rewrite period.
pub const STATUS_FILE_PERIOD: Duration = Duration::from_secs(5);

/// Worker liveness poll period.
pub const WORKER_LIVENESS_PERIOD: Duration = Duration::from_secs(1);

/// Default health-check interval, in seconds.
pub const HC_INTERVAL_SECS: u64 = 2;

/// Default consecutive-failure threshold before a probe is hard Down.
pub const HC_MAX_FAILED: u32 = 3;

/// Default per-check timeout, in milliseconds.
pub const HC_TIMEOUT_MS: u64 = 1500;

/// Default DNS query port.
pub const DNS_PORT: u16 = 53;

/// Default Postgres port.
pub const POSTGRES_PORT: u16 = 5432;

/// Default HTTP request line template.
pub const HTTP_REQUEST_TEMPLATE: &str = "HEAD /";

/// Default set of acceptable HTTP status codes.
pub const HTTP_OK_CODES: &[&str] = &["200"];

/// Maximum jitter applied to probe spreading, in milliseconds.
pub const JITTER_MAX_MS: u64 = 1000;

/// Worker IPC mailbox capacity.
pub const WORKER_QUEUE_CAPACITY: usize = 10;

/// Maximum entries carried per IPC message.
pub const MAX_ENTRIES_PER_MESSAGE: usize = 20;

/// Maximum length of a pool or table name field in the IPC message.
pub const MAX_NAME_BYTES: usize = 256;

/// Maximum length of an address string field in the IPC message.
pub const MAX_ADDRESS_BYTES: usize = 46;

/// ICMP sequence-to-probe lookup table size (2^16 possible sequence numbers).
pub const ICMP_SEQUENCE_TABLE_SIZE: usize = 65_536;

/// libpq-equivalent reschedule budget retained for parity with the
/// original design's livelock guard; unused by the tokio-postgres probe
/// (see DESIGN.md) but kept as a documented constant in case a future
/// probe needs a manual poll loop again.
#[allow(dead_code)]
pub const POSTGRES_MAX_STEP_RESCHEDULES: u32 = 100;

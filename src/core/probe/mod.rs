//! Probe implementations: six concrete protocol state machines plus a
//! test-only dummy, all driven from the scheduler through [`run_probe`].
//!
//! Every non-ICMP probe is run as an owned, `'static`-free future that the
//! scheduler awaits concurrently with its siblings via `futures::join_all`
//! within a single tick — genuine interleaved I/O on one OS thread, with no
//! `tokio::spawn`/`Send` bound required. ICMP is the exception: replies are
//! delivered asynchronously by the shared subsystem in [`icmp`], so the
//! scheduler only sends there and later reads completions back (see
//! `scheduler.rs`).

pub mod dns;
pub mod dummy;
pub mod http;
pub mod icmp;
pub mod postgres;
pub mod tcp;

use rand::Rng;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::config::{HcType, HealthCheckConfig};

/// The four outcomes every probe implementation may produce.
#[derive(Debug, Clone)]
pub enum Outcome {
    Pass,
    Fail(String),
    Drain,
    /// Internal fault; the caller terminates the process with exit code 2.
    Panic(String),
}

/// A probe's (and, by extension, a node's) coarse health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeState {
    Up,
    #[default]
    Down,
    Drain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Protocol-specific configuration for one probe.
#[derive(Debug, Clone)]
pub enum ProbeKind {
    Tcp,
    Http {
        request_template: String,
        host: Option<String>,
        ok_codes: Vec<String>,
        tls: bool,
    },
    Dns {
        domain: String,
    },
    Icmp,
    Postgres {
        dbname: String,
        user: String,
        function: String,
    },
    Dummy,
}

impl ProbeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeKind::Tcp => "tcp",
            ProbeKind::Http { tls: false, .. } => "http",
            ProbeKind::Http { tls: true, .. } => "https",
            ProbeKind::Dns { .. } => "dns",
            ProbeKind::Icmp => "ping",
            ProbeKind::Postgres { .. } => "postgres",
            ProbeKind::Dummy => "dummy",
        }
    }

    pub fn from_config(cfg: &HealthCheckConfig) -> Self {
        let ok_codes = || {
            cfg.hc_ok_codes.clone().unwrap_or_else(|| {
                crate::config::defaults::HTTP_OK_CODES
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            })
        };
        let request_template = || {
            cfg.hc_request
                .clone()
                .unwrap_or_else(|| crate::config::defaults::HTTP_REQUEST_TEMPLATE.to_string())
        };
        match cfg.hc_type {
            HcType::Tcp => ProbeKind::Tcp,
            HcType::Http => ProbeKind::Http {
                request_template: request_template(),
                host: cfg.hc_host.clone(),
                ok_codes: ok_codes(),
                tls: false,
            },
            HcType::Https => ProbeKind::Http {
                request_template: request_template(),
                host: cfg.hc_host.clone(),
                ok_codes: ok_codes(),
                tls: true,
            },
            HcType::Dns => ProbeKind::Dns {
                domain: cfg.hc_query.clone().unwrap_or_else(|| "example.com".to_string()),
            },
            HcType::Ping => ProbeKind::Icmp,
            HcType::Postgres => ProbeKind::Postgres {
                dbname: cfg.dbname.clone().unwrap_or_else(|| "postgres".to_string()),
                user: cfg.user.clone().unwrap_or_else(|| "postgres".to_string()),
                function: cfg.function.clone().unwrap_or_else(|| "healthcheck".to_string()),
            },
            HcType::Dummy => ProbeKind::Dummy,
        }
    }
}

/// One probe attached to a node: `(node, address-family, check type)`.
#[derive(Debug, Clone)]
pub struct Probe {
    pub kind: ProbeKind,
    pub family: AddressFamily,
    pub address: IpAddr,
    pub port: u16,
    pub timeout: Duration,
    pub interval: Duration,
    pub max_failed: u32,
    pub failures: u32,
    pub last_check: Option<Instant>,
    pub jitter: Duration,
    pub running: bool,
    pub last_result: ProbeState,
    pub hard_state: ProbeState,
    pub checked: bool,
    /// For ICMP only: when the outstanding echo request was sent.
    pub icmp_sent_at: Option<Instant>,
    /// For ICMP only: the sequence number allocated to the outstanding
    /// request, so a self-timed-out probe can tell the subsystem to
    /// abandon the slot rather than leave it to a stray late reply.
    pub icmp_seq: Option<u16>,
    /// Dummy probes are fed outcomes from the test harness.
    pub dummy_queue: std::collections::VecDeque<Outcome>,
}

impl Probe {
    /// `port` is the already-resolved concrete port (explicit `hc_port`,
    /// else the check type's protocol default, else the pool's `port`);
    /// resolving that fallback chain is the caller's job, since it needs
    /// the pool config that outlives any one `HealthCheckConfig`.
    pub fn new(kind: ProbeKind, family: AddressFamily, address: IpAddr, port: u16, cfg: &HealthCheckConfig) -> Self {
        let jitter_ms = rand::thread_rng().gen_range(0..=crate::config::defaults::JITTER_MAX_MS);
        Self {
            kind,
            family,
            address,
            port,
            timeout: Duration::from_millis(cfg.hc_timeout),
            interval: Duration::from_secs(cfg.hc_interval),
            max_failed: cfg.hc_max_failed,
            failures: 0,
            last_check: None,
            jitter: Duration::from_millis(jitter_ms),
            running: false,
            last_result: ProbeState::Down,
            hard_state: ProbeState::Down,
            checked: false,
            icmp_sent_at: None,
            icmp_seq: None,
            dummy_queue: std::collections::VecDeque::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    /// True once `interval` has elapsed since the last check (plus jitter
    /// on the very first run, to spread initial probes), or if it has
    /// never run at all.
    pub fn due(&self, now: Instant) -> bool {
        if self.running {
            return false;
        }
        match self.last_check {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    /// Apply the outcome-to-hard-state logic: Pass always clears the
    /// failure counter and sets Up immediately; Fail only flips the hard
    /// state to Down once the consecutive-failure threshold is reached;
    /// Drain is immediate and does not touch the counter. Returns an exit
    /// code if the outcome was Panic.
    pub fn record_outcome(&mut self, outcome: Outcome) -> Option<i32> {
        self.running = false;
        self.checked = true;
        match outcome {
            Outcome::Pass => {
                self.last_result = ProbeState::Up;
                self.failures = 0;
                self.hard_state = ProbeState::Up;
                None
            }
            Outcome::Fail(_) => {
                self.last_result = ProbeState::Down;
                self.failures += 1;
                if self.failures >= self.max_failed {
                    self.hard_state = ProbeState::Down;
                }
                None
            }
            Outcome::Drain => {
                self.last_result = ProbeState::Drain;
                self.hard_state = ProbeState::Drain;
                None
            }
            Outcome::Panic(_) => Some(crate::error::EXIT_PANIC),
        }
    }

    /// Force this probe down without waiting for a fresh check, used when a
    /// node leaves Downtime so it cannot flap back to Up on stale state.
    pub fn force_down(&mut self) {
        self.last_result = ProbeState::Down;
        self.hard_state = ProbeState::Down;
        self.failures = self.max_failed;
    }
}

/// Template substitution context for the HTTP/HTTPS probe (`spec.md` §4.2).
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub pool_name: String,
    pub pool_address: String,
    pub node_name: String,
    pub node_address: String,
    pub active_node_names: String,
    pub active_node_addresses: String,
}

/// An owned, borrow-free snapshot of a due probe, built by the scheduler
/// before the concurrent dispatch phase of a tick.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub kind: ProbeKind,
    pub address: IpAddr,
    pub port: u16,
    pub timeout: Duration,
    pub ctx: RunContext,
}

/// Drive one probe to a terminal [`Outcome`], respecting `spec.timeout`.
pub async fn run_probe(spec: ProbeSpec) -> Outcome {
    let timeout = spec.timeout;
    let result = tokio::time::timeout(timeout, dispatch(&spec)).await;
    match result {
        Ok(outcome) => outcome,
        Err(_) => Outcome::Fail(format!(
            "timeout after {}.{:03}s",
            timeout.as_secs(),
            timeout.subsec_millis()
        )),
    }
}

async fn dispatch(spec: &ProbeSpec) -> Outcome {
    match &spec.kind {
        ProbeKind::Tcp => tcp::run(spec).await,
        ProbeKind::Http { .. } => http::run(spec).await,
        ProbeKind::Dns { domain } => dns::run(spec, domain).await,
        ProbeKind::Postgres {
            dbname,
            user,
            function,
        } => postgres::run(spec, dbname, user, function).await,
        ProbeKind::Icmp | ProbeKind::Dummy => {
            unreachable!("icmp and dummy probes never go through run_probe()")
        }
    }
}

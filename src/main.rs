//! Process entry point: wires configuration, the probe/worker subsystems,
//! and the scheduler loop together, and owns the signal handling and exit
//! codes the rest of the crate only describes (`spec.md` §1/§7).
//!
//! Grounded on `examples/original_source/service.cpp` and `testtool.cpp`'s
//! top-level loop shape — schedule, poll, finalize, periodically dump
//! status and check the worker — collapsed into one `tokio::select!` per
//! `spec.md` §9's endorsement of a reactor-driven loop over a hand-rolled
//! `select()`.

use std::sync::Arc;

use lbhealthd::cli::Cli;
use lbhealthd::config;
use lbhealthd::core::clock::SystemClock;
use lbhealthd::core::pool::Pool;
use lbhealthd::core::probe::icmp::IcmpSubsystem;
use lbhealthd::core::Scheduler;
use lbhealthd::error::{EXIT_FATAL, EXIT_OK, EXIT_WORKER_LOST};
use lbhealthd::logging::{Level, LogContext, Logger};
use lbhealthd::status::{PoolStatus, StatusReporter};
use lbhealthd::worker::{spawn_worker, worker_channel, CommandFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // The HTTPS probe builds a `rustls::ClientConfig` per run; rustls 0.23
    // requires a process-level default crypto provider to be installed
    // before any config can be built. Installing it here, once, at startup
    // keeps that requirement out of the probe's hot path.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse_args();
    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let logger = Arc::new(Logger::with_verbosity(cli.log_file.clone(), cli.verbose));

    let root = match config::load_from_path(&cli.config) {
        Ok(root) => root,
        Err(e) => {
            logger.log(
                Level::Critical,
                "config",
                "load_failed",
                &e.to_string(),
                &LogContext::default(),
            );
            return EXIT_FATAL;
        }
    };

    if let Some(pid_path) = &cli.pid_file {
        if let Err(e) = std::fs::write(pid_path, std::process::id().to_string()) {
            logger.log(
                Level::Warn,
                "startup",
                "pid_file_write_failed",
                &e.to_string(),
                &LogContext::default(),
            );
        }
    }

    let pools: Vec<Pool> = root
        .iter()
        .map(|(name, cfg)| Pool::new(name.clone(), cfg))
        .collect();

    let icmp = match IcmpSubsystem::start() {
        Ok(sub) => Some(sub),
        Err(e) => {
            logger.log(
                Level::Warn,
                "icmp",
                "subsystem_unavailable",
                &format!("ping probes will fail: {e}"),
                &LogContext::default(),
            );
            None
        }
    };

    let (worker_tx, worker_rx) = worker_channel();
    let filter = Arc::new(CommandFilter::new(logger.clone()));
    let worker_handle = spawn_worker(worker_rx, filter, logger.clone());

    let clock = Arc::new(SystemClock);
    let mut scheduler = Scheduler::new(pools, clock, icmp, worker_tx, logger.clone());
    scheduler.prime();

    let status_reporter = StatusReporter::new(cli.status_file.clone());

    let mut tick_interval = tokio::time::interval(config::defaults::SCHEDULER_TICK);
    let mut status_interval = tokio::time::interval(config::defaults::STATUS_FILE_PERIOD);
    let mut liveness_interval = tokio::time::interval(config::defaults::WORKER_LIVENESS_PERIOD);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("installing SIGINT handler");
    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .expect("installing SIGHUP handler");

    let exit_code = loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                if let Some(code) = scheduler.tick().await {
                    logger.log(
                        Level::Critical,
                        "scheduler",
                        "probe_panic",
                        "a probe reported an internal fault, shutting down",
                        &LogContext::default(),
                    );
                    break code;
                }
            }
            _ = status_interval.tick() => {
                let statuses: Vec<PoolStatus> = scheduler.pools.iter().map(PoolStatus::from_pool).collect();
                if let Err(e) = status_reporter.write(&statuses).await {
                    logger.log(
                        Level::Warn,
                        "status",
                        "write_failed",
                        &e.to_string(),
                        &LogContext::default(),
                    );
                }
            }
            _ = liveness_interval.tick() => {
                if worker_handle.is_finished() {
                    logger.log(
                        Level::Critical,
                        "worker",
                        "lost",
                        "worker thread exited unexpectedly",
                        &LogContext::default(),
                    );
                    break EXIT_WORKER_LOST;
                }
            }
            _ = sigterm.recv() => {
                break EXIT_OK;
            }
            _ = sigint.recv() => {
                break EXIT_OK;
            }
            _ = sighup.recv() => {
                match config::load_from_path(&cli.config) {
                    Ok(reloaded) => scheduler.reload_admin_states(&reloaded),
                    Err(e) => logger.log(
                        Level::Warn,
                        "config",
                        "reload_failed",
                        &e.to_string(),
                        &LogContext::default(),
                    ),
                }
            }
        }
    };

    if let Some(pid_path) = &cli.pid_file {
        let _ = std::fs::remove_file(pid_path);
    }

    exit_code
}

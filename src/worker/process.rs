//! The worker loop itself: reconciles an incoming [`FilterMessage`]
//! against the filter's current table contents.
//!
//! Grounded directly on `examples/original_source/lb_pool.cpp`'s comment
//! about the worker's responsibilities and `pfctl.cpp`'s
//! `pf_table_rebalance` (show, then kill src-nodes to everything except
//! the kept address). The two-pass delete-then-kill-src-nodes dance in
//! step 3 is called out explicitly by `spec.md` §4.6 as required by the
//! filter's deferred src-node semantics; it is not an artifact of the
//! original source this driver happens to preserve for no reason.

use std::collections::BTreeSet;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::filter::FilterControl;
use super::message::{EntryState, FilterMessage};
use crate::logging::{Level, LogContext, Logger};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub fn spawn_worker(
    rx: Receiver<FilterMessage>,
    filter: Arc<dyn FilterControl>,
    logger: Arc<Logger>,
) -> JoinHandle<()> {
    std::thread::spawn(move || worker_loop(rx, filter.as_ref(), &logger))
}

fn worker_loop(rx: Receiver<FilterMessage>, filter: &dyn FilterControl, logger: &Logger) {
    loop {
        match rx.recv_timeout(RECV_TIMEOUT) {
            Ok(message) => reconcile(filter, &message, Some(logger)),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Apply one message: compute `want`/`have`, delete-then-add, two-pass
/// src-node kill on deletions, then rebalance if anything was added, and
/// log how long the whole reconciliation took (`spec.md` §4.6 step 6).
/// `logger` is optional so tests can call this directly against a
/// [`super::filter::MockFilter`] without standing up a `Logger`.
pub fn reconcile(filter: &dyn FilterControl, message: &FilterMessage, logger: Option<&Logger>) {
    let started = std::time::Instant::now();

    let want: BTreeSet<String> = message
        .entries
        .iter()
        .filter(|e| e.state == EntryState::Up)
        .filter_map(|e| e.ipv4.clone().or_else(|| e.ipv6.clone()))
        .collect();

    let have: BTreeSet<String> = match filter.table_show(&message.table_name) {
        Ok(addrs) => addrs.into_iter().collect(),
        Err(_) => BTreeSet::new(),
    };

    let to_del: Vec<&String> = have.difference(&want).collect();
    let to_add: Vec<&String> = want.difference(&have).collect();

    for address in &to_del {
        let _ = filter.table_del(&message.table_name, address);
        let drain = entry_state(message, address) == Some(EntryState::Drain);
        if !drain {
            let _ = filter.kill_src_nodes_to(&message.table_name, address, true);
            let _ = filter.kill_states_to_rdr(&message.table_name, address);
            // Second pass: catches src-nodes created between the delete
            // and the first kill, per the filter's deferred semantics.
            // Must also reset their states, same as the first pass.
            let _ = filter.kill_src_nodes_to(&message.table_name, address, true);
        }
    }

    for address in &to_add {
        let _ = filter.table_add(&message.table_name, address);
    }

    if !to_add.is_empty() {
        if let Ok(members) = filter.table_show(&message.table_name) {
            for member in members {
                if !to_add.iter().any(|a| **a == member) {
                    let _ = filter.kill_src_nodes_to(&message.table_name, &member, false);
                }
            }
        }
    }

    let elapsed = started.elapsed();
    if let Some(logger) = logger {
        logger.log(
            Level::Debug,
            "worker",
            "reconcile",
            &format!(
                "reconciled {} ({} added, {} removed) in {:.3}s",
                message.table_name,
                to_add.len(),
                to_del.len(),
                elapsed.as_secs_f64()
            ),
            &LogContext::pool(message.pool_name.clone()),
        );
    }
}

/// The entry's resolved node state (not its admin override), since a node
/// can reach Drain either administratively (`deploy_offline`) or via a
/// probe reporting the `Drain` outcome directly — both must be spared the
/// forcible src-node/state kill on removal (`spec.md` §4.6).
fn entry_state(message: &FilterMessage, address: &str) -> Option<EntryState> {
    message
        .entries
        .iter()
        .find(|e| e.ipv4.as_deref() == Some(address) || e.ipv6.as_deref() == Some(address))
        .map(|e| e.state)
}

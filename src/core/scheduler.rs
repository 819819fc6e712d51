//! The periodic driver: ticks at roughly 10 Hz, dispatching scheduling and
//! finalization passes over every pool (`spec.md` §2 component 1, §5).
//!
//! Grounded on `examples/original_source/service.cpp`'s
//! `schedule_healthchecks()` (the "is it due, dispatch in declaration
//! order" loop survives almost verbatim as `Scheduler::due_specs`) and
//! `testtool.cpp`'s top-level loop shape (schedule, poll sockets, finalize,
//! periodically dump status and poll the worker) — collapsed here into one
//! `tick()` a `tokio` reactor drives instead of a hand-rolled `select()`
//! loop, per `spec.md` §9's explicit endorsement of that substitution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::RootConfig;
use crate::core::clock::Clock;
use crate::core::node::NodeState;
use crate::core::pool::Pool;
use crate::core::probe::icmp::{IcmpCompletion, IcmpSubsystem, ProbeKey};
use crate::core::probe::{run_probe, AddressFamily, Outcome, ProbeKind, ProbeSpec, RunContext};
use crate::logging::{LogContext, Level, Logger};
use crate::worker::{Entry, EntryState, FilterMessage, WorkerSender};

/// Addresses one probe by its position in `Scheduler::pools`, mirroring
/// [`ProbeKey`] but usable for every probe kind, not only ICMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProbeAddr {
    pool_idx: usize,
    node_idx: usize,
    probe_idx: usize,
}

pub struct Scheduler {
    pub pools: Vec<Pool>,
    name_index: HashMap<String, usize>,
    clock: Arc<dyn Clock>,
    icmp: Option<IcmpSubsystem>,
    worker_tx: WorkerSender,
    logger: Arc<Logger>,
}

impl Scheduler {
    pub fn new(
        pools: Vec<Pool>,
        clock: Arc<dyn Clock>,
        icmp: Option<IcmpSubsystem>,
        worker_tx: WorkerSender,
        logger: Arc<Logger>,
    ) -> Self {
        let name_index = pools
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Self {
            pools,
            name_index,
            clock,
            icmp,
            worker_tx,
            logger,
        }
    }

    /// Shifts every probe's first-run time by its jitter so initial probes
    /// spread out instead of firing as one burst (`spec.md` §3: "a small
    /// random per-instance jitter ... applied to spreading").
    pub fn prime(&mut self) {
        let now = self.clock.now();
        for pool in &mut self.pools {
            for node in &mut pool.nodes {
                for probe in &mut node.probes {
                    let delay = probe.interval.saturating_sub(probe.jitter);
                    probe.last_check = now.checked_sub(delay);
                }
            }
        }
    }

    /// Run one scheduling + finalization pass. Returns `Some(exit_code)`
    /// if a probe produced an internal Panic (`spec.md` §4.2/§7), which the
    /// caller must act on by terminating the process.
    pub async fn tick(&mut self) -> Option<i32> {
        let now = self.clock.now();

        let mut touched: Vec<ProbeAddr> = Vec::new();

        if let Some(code) = self.dispatch_due(now, &mut touched).await {
            return Some(code);
        }
        self.finalize_icmp(now, &mut touched);
        self.drain_icmp_completions(&mut touched);

        let mut dirty = vec![false; self.pools.len()];
        for addr in touched {
            let node = &mut self.pools[addr.pool_idx].nodes[addr.node_idx];
            if node.take_state_changed() {
                dirty[addr.pool_idx] = true;
                let pool_name = self.pools[addr.pool_idx].name.clone();
                let node_name = self.pools[addr.pool_idx].nodes[addr.node_idx].name.clone();
                let state = self.pools[addr.pool_idx].nodes[addr.node_idx].state();
                self.logger.log(
                    Level::Info,
                    "node",
                    "state_changed",
                    &format!("node state is now {state:?}"),
                    &LogContext::node(pool_name, node_name),
                );
            }
        }

        self.reevaluate(dirty);
        self.flush_worker_sends();

        None
    }

    /// Scheduling pass: collect every due probe in deterministic
    /// (pool, node, probe) declaration order, dispatch ICMP sends
    /// immediately (they complete asynchronously) and dummy outcomes
    /// synchronously, then await every remaining probe concurrently in one
    /// `join_all` so a tick's I/O genuinely overlaps (`spec.md` §4.1).
    async fn dispatch_due(&mut self, now: Instant, touched: &mut Vec<ProbeAddr>) -> Option<i32> {
        let mut specs: Vec<(ProbeAddr, ProbeSpec)> = Vec::new();

        for pool_idx in 0..self.pools.len() {
            let active_names = self.pools[pool_idx].active_node_names().join(",");
            for node_idx in 0..self.pools[pool_idx].nodes.len() {
                for probe_idx in 0..self.pools[pool_idx].nodes[node_idx].probes.len() {
                    let due = self.pools[pool_idx].nodes[node_idx].probes[probe_idx].due(now);
                    if !due {
                        continue;
                    }
                    let addr = ProbeAddr {
                        pool_idx,
                        node_idx,
                        probe_idx,
                    };

                    match self.pools[pool_idx].nodes[node_idx].probes[probe_idx].kind.clone() {
                        ProbeKind::Dummy => {
                            let probe = &mut self.pools[pool_idx].nodes[node_idx].probes[probe_idx];
                            probe.running = true;
                            probe.last_check = Some(now);
                            let outcome = crate::core::probe::dummy::next(&mut probe.dummy_queue);
                            if let Some(code) = self.pools[pool_idx].nodes[node_idx]
                                .apply_outcome(probe_idx, outcome)
                            {
                                return Some(code);
                            }
                            touched.push(addr);
                        }
                        ProbeKind::Icmp => {
                            self.send_icmp(addr, now, &active_names);
                            touched.push(addr);
                        }
                        _ => {
                            let spec = self.build_spec(pool_idx, node_idx, probe_idx, &active_names);
                            let probe = &mut self.pools[pool_idx].nodes[node_idx].probes[probe_idx];
                            probe.running = true;
                            probe.last_check = Some(now);
                            specs.push((addr, spec));
                            touched.push(addr);
                        }
                    }
                }
            }
        }

        if specs.is_empty() {
            return None;
        }

        let (addrs, specs): (Vec<_>, Vec<_>) = specs.into_iter().unzip();
        let outcomes = futures::future::join_all(specs.into_iter().map(run_probe)).await;

        for (addr, outcome) in addrs.into_iter().zip(outcomes) {
            if matches!(outcome, Outcome::Fail(_)) {
                self.log_outcome(addr, &outcome);
            }
            if let Some(code) =
                self.pools[addr.pool_idx].nodes[addr.node_idx].apply_outcome(addr.probe_idx, outcome)
            {
                return Some(code);
            }
        }
        None
    }

    fn build_spec(&self, pool_idx: usize, node_idx: usize, probe_idx: usize, active_names: &str) -> ProbeSpec {
        let pool = &self.pools[pool_idx];
        let node = &pool.nodes[node_idx];
        let probe = &node.probes[probe_idx];

        let active_addresses = pool
            .active
            .iter()
            .filter_map(|&i| address_for_family(&pool.nodes[i], probe.family))
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let ctx = RunContext {
            pool_name: pool.name.clone(),
            pool_address: pool
                .service_address(probe.family)
                .map(|a| a.to_string())
                .unwrap_or_default(),
            node_name: node.name.clone(),
            node_address: probe.address.to_string(),
            active_node_names: active_names.to_string(),
            active_node_addresses: active_addresses,
        };

        ProbeSpec {
            kind: probe.kind.clone(),
            address: probe.address,
            port: probe.port,
            timeout: probe.timeout,
            ctx,
        }
    }

    fn send_icmp(&mut self, addr: ProbeAddr, now: Instant, _active_names: &str) {
        let probe = &mut self.pools[addr.pool_idx].nodes[addr.node_idx].probes[addr.probe_idx];
        probe.running = true;
        probe.last_check = Some(now);

        let Some(icmp) = &self.icmp else {
            let outcome = Outcome::Fail("icmp subsystem unavailable".to_string());
            let _ = self.pools[addr.pool_idx].nodes[addr.node_idx].apply_outcome(addr.probe_idx, outcome);
            return;
        };

        let key = ProbeKey {
            pool_index: addr.pool_idx,
            node_index: addr.node_idx,
            probe_index: addr.probe_idx,
        };
        let address = probe.address;
        let family = probe.family;
        match icmp.send_echo(key, address, family) {
            Ok(seq) => {
                let probe = &mut self.pools[addr.pool_idx].nodes[addr.node_idx].probes[addr.probe_idx];
                probe.icmp_sent_at = Some(now);
                probe.icmp_seq = Some(seq);
            }
            Err(e) => {
                let outcome = Outcome::Fail(format!("icmp send failed: {e}"));
                let _ = self.pools[addr.pool_idx].nodes[addr.node_idx].apply_outcome(addr.probe_idx, outcome);
            }
        }
    }

    /// No raw socket has a per-probe timeout, so every running ICMP probe
    /// is walked every tick and synthesized Fail if its deadline passed
    /// (`spec.md` §4.2).
    fn finalize_icmp(&mut self, now: Instant, touched: &mut Vec<ProbeAddr>) {
        for pool_idx in 0..self.pools.len() {
            for node_idx in 0..self.pools[pool_idx].nodes.len() {
                for probe_idx in 0..self.pools[pool_idx].nodes[node_idx].probes.len() {
                    let probe = &self.pools[pool_idx].nodes[node_idx].probes[probe_idx];
                    if !matches!(probe.kind, ProbeKind::Icmp) || !probe.running {
                        continue;
                    }
                    let Some(sent_at) = probe.icmp_sent_at else { continue };
                    if now.duration_since(sent_at) < probe.timeout {
                        continue;
                    }
                    if let (Some(icmp), Some(seq)) = (&self.icmp, probe.icmp_seq) {
                        icmp.abandon(seq);
                    }
                    let timeout = probe.timeout;
                    let outcome = Outcome::Fail(format!(
                        "timeout after {}.{:03}s",
                        timeout.as_secs(),
                        timeout.subsec_millis()
                    ));
                    let addr = ProbeAddr {
                        pool_idx,
                        node_idx,
                        probe_idx,
                    };
                    self.log_outcome(addr, &outcome);
                    self.pools[pool_idx].nodes[node_idx].apply_outcome(probe_idx, outcome);
                    touched.push(addr);
                }
            }
        }
    }

    fn drain_icmp_completions(&mut self, touched: &mut Vec<ProbeAddr>) {
        let Some(icmp) = &mut self.icmp else { return };
        let mut completions: Vec<IcmpCompletion> = Vec::new();
        icmp.drain_completions(&mut completions);
        for completion in completions {
            let key = completion.key;
            let addr = ProbeAddr {
                pool_idx: key.pool_index,
                node_idx: key.node_index,
                probe_idx: key.probe_index,
            };
            let Some(pool) = self.pools.get_mut(addr.pool_idx) else { continue };
            let Some(node) = pool.nodes.get_mut(addr.node_idx) else { continue };
            let Some(probe) = node.probes.get_mut(addr.probe_idx) else { continue };
            if !probe.running {
                // Already timed out and finalized this tick or a prior one.
                continue;
            }
            probe.icmp_sent_at = None;
            probe.icmp_seq = None;
            node.apply_outcome(addr.probe_idx, Outcome::Pass);
            touched.push(addr);
        }
    }

    /// Re-evaluate every dirty pool to a fixed point, following transitive
    /// backup-pool dependents per `spec.md` §4.5 step 7.
    fn reevaluate(&mut self, mut dirty: Vec<bool>) {
        loop {
            let mut changed_any = false;
            for idx in 0..self.pools.len() {
                if !dirty[idx] {
                    continue;
                }
                dirty[idx] = false;

                let backup_idx = self.pools[idx]
                    .backup_pool
                    .as_ref()
                    .and_then(|name| self.name_index.get(name).copied());
                let backup_active = backup_idx.map(|bi| self.pools[bi].effective_active_names());

                let previous_active = self.pools[idx].active.clone();
                let previous_backup_active = self.pools[idx].backup_pool_active;
                let previous_state = self.pools[idx].state;

                self.pools[idx].evaluate(backup_active.as_deref());

                let pool_changed = self.pools[idx].active != previous_active
                    || self.pools[idx].backup_pool_active != previous_backup_active;

                if self.pools[idx].state != previous_state {
                    self.logger.log(
                        Level::Info,
                        "pool",
                        "state_changed",
                        &format!("pool state is now {:?}", self.pools[idx].state),
                        &LogContext::pool(self.pools[idx].name.clone()),
                    );
                }

                if pool_changed {
                    changed_any = true;
                    let name = self.pools[idx].name.clone();
                    for j in 0..self.pools.len() {
                        if j != idx
                            && self.pools[j].backup_pool.as_deref() == Some(name.as_str())
                            && self.pools[j].backup_pool_active
                        {
                            dirty[j] = true;
                        }
                    }
                }
            }
            if !changed_any {
                break;
            }
        }
    }

    /// Attempt to hand every out-of-sync pool's intended active set to the
    /// worker, non-blocking; a full channel just leaves `synced = false`
    /// for the next tick to retry (`spec.md` §4.6).
    fn flush_worker_sends(&mut self) {
        for idx in 0..self.pools.len() {
            if self.pools[idx].synced {
                continue;
            }
            let message = self.build_filter_message(idx);
            match self.worker_tx.try_send(message) {
                Ok(()) => self.pools[idx].synced = true,
                Err(_) => {
                    self.logger.log(
                        Level::Warn,
                        "worker",
                        "channel_full",
                        "worker channel full, will retry",
                        &LogContext::pool(self.pools[idx].name.clone()),
                    );
                }
            }
        }
    }

    fn build_filter_message(&self, idx: usize) -> FilterMessage {
        let pool = &self.pools[idx];

        let entries = if pool.backup_pool_active {
            let backup_idx = pool
                .backup_pool
                .as_ref()
                .and_then(|name| self.name_index.get(name).copied());
            match backup_idx {
                Some(bi) => {
                    let backup = &self.pools[bi];
                    backup
                        .active
                        .iter()
                        .map(|&i| {
                            let node = &backup.nodes[i];
                            Entry {
                                ipv4: node.ipv4.map(|a| a.to_string()),
                                ipv6: node.ipv6.map(|a| a.to_string()),
                                state: EntryState::Up,
                                admin_state: node.admin_state,
                            }
                        })
                        .collect()
                }
                None => Vec::new(),
            }
        } else {
            pool.nodes
                .iter()
                .enumerate()
                .map(|(i, node)| {
                    let up = pool.active.contains(&i);
                    let state = if up {
                        EntryState::Up
                    } else {
                        to_entry_state(node.state())
                    };
                    Entry {
                        ipv4: node.ipv4.map(|a| a.to_string()),
                        ipv6: node.ipv6.map(|a| a.to_string()),
                        state,
                        admin_state: node.admin_state,
                    }
                })
                .collect()
        };

        FilterMessage::new(pool.name.clone(), pool.table.clone(), entries)
    }

    fn log_outcome(&self, addr: ProbeAddr, outcome: &Outcome) {
        let pool = &self.pools[addr.pool_idx];
        let node = &pool.nodes[addr.node_idx];
        let probe = &node.probes[addr.probe_idx];
        if let Outcome::Fail(message) = outcome {
            self.logger.log(
                Level::Debug,
                "probe",
                "fail",
                message,
                &LogContext::probe(pool.name.clone(), node.name.clone(), probe.label()),
            );
        }
    }

    /// Re-reads the admin-state portion of a reloaded configuration
    /// document, per `spec.md` §6's reserved reload signal: existing
    /// pools/nodes are updated in place, probes are left running.
    pub fn reload_admin_states(&mut self, root: &RootConfig) {
        let mut dirty = vec![false; self.pools.len()];
        for (pool_idx, pool) in self.pools.iter_mut().enumerate() {
            let Some(pool_cfg) = root.get(&pool.name) else {
                continue;
            };
            for node in &mut pool.nodes {
                if let Some(node_cfg) = pool_cfg.nodes.get(&node.name) {
                    let before = node.state();
                    node.apply_admin_state(node_cfg.state);
                    if node.state() != before {
                        dirty[pool_idx] = true;
                    }
                }
            }
        }
        self.reevaluate(dirty);
        self.flush_worker_sends();
    }
}

fn address_for_family(
    node: &crate::core::node::Node,
    family: AddressFamily,
) -> Option<std::net::IpAddr> {
    match family {
        AddressFamily::V4 => node.ipv4.or(node.ipv6),
        AddressFamily::V6 => node.ipv6.or(node.ipv4),
    }
}

fn to_entry_state(state: NodeState) -> EntryState {
    match state {
        NodeState::Up => EntryState::Up,
        NodeState::Down => EntryState::Down,
        NodeState::Drain => EntryState::Drain,
        NodeState::Downtime => EntryState::Downtime,
    }
}

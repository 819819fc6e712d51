//! Pool logic: turns per-node states into an intended active set, honoring
//! minimum/maximum counts, the fault policy, and backup-pool fallback.
//!
//! The active-set algorithm follows `spec.md` §4.5 literally for the
//! max-kept path (confirmed against end-to-end scenario 4: max-nodes
//! rotation). The min-kept path resolves a genuine tension in §4.5's
//! wording against scenario 3 (min-nodes force-up): a flag that, once set
//! by an emergency ForceUp pick, never clears until that exact node probes
//! Up again would leave stale picks outranking the node that is *actually*
//! sustaining the pool right now. Scenario 3 requires the opposite: when
//! lbnode2 is the one keeping the pool at minimum and then fails, it — not
//! the original emergency pick — must be the one re-added. This module
//! resolves that by clearing every node's min-kept flag the moment the
//! pool is satisfied without ForceUp, and by setting it on whichever
//! node(s) caused the shortfall at the instant they drop out of the
//! ordinary Up set. That keeps "min-kept" meaning what §3's invariant says
//! it means — "the node(s) currently substituting for a shortfall" —
//! rather than a permanent tattoo from the first time ForceUp ever fired.
//! See DESIGN.md for the full writeup.

use crate::config::{defaults, FaultPolicy, HcType, PoolConfig};
use crate::core::node::{Node, NodeState};
use crate::core::probe::{AddressFamily, Probe, ProbeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Up,
    Down,
}

pub struct Pool {
    pub name: String,
    pub service_ipv4: Option<std::net::IpAddr>,
    pub service_ipv6: Option<std::net::IpAddr>,
    pub table: String,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub fault_policy: FaultPolicy,
    pub backup_pool: Option<String>,
    pub nodes: Vec<Node>,
    /// Indices into `nodes`, in the order they currently form the
    /// intended active set.
    pub active: Vec<usize>,
    pub state: PoolState,
    pub synced: bool,
    /// True while this pool's own shortfall is being covered by its
    /// configured `backup_pool`'s active set.
    pub backup_pool_active: bool,
    /// Set alongside `backup_pool_active`: the borrowed node addresses,
    /// since they belong to another pool's node list and cannot be
    /// expressed as indices into `self.nodes`.
    backup_active_names: Option<Vec<String>>,
}

impl Pool {
    pub fn new(name: String, cfg: &PoolConfig) -> Self {
        let nodes = cfg
            .nodes
            .iter()
            .map(|(node_name, node_cfg)| {
                let mut node = Node::new(node_name.clone(), node_cfg);
                attach_probes(&mut node, cfg);
                node
            })
            .collect();
        Self {
            name,
            service_ipv4: cfg.service_ipv4.as_deref().and_then(|s| s.parse().ok()),
            service_ipv6: cfg.service_ipv6.as_deref().and_then(|s| s.parse().ok()),
            table: cfg.table.clone(),
            min_nodes: cfg.min_nodes,
            max_nodes: cfg.max_nodes,
            fault_policy: cfg.min_nodes_action,
            backup_pool: cfg.backup_pool.clone(),
            nodes,
            active: Vec::new(),
            state: PoolState::Down,
            synced: false,
            backup_pool_active: false,
            backup_active_names: None,
        }
    }

    pub fn active_node_names(&self) -> Vec<String> {
        self.active.iter().map(|&i| self.nodes[i].name.clone()).collect()
    }

    /// Service address for template substitution (`{POOL_ADDRESS}`),
    /// preferring the family matching `family` when both are configured.
    pub fn service_address(&self, family: crate::core::probe::AddressFamily) -> Option<std::net::IpAddr> {
        use crate::core::probe::AddressFamily;
        match family {
            AddressFamily::V4 => self.service_ipv4.or(self.service_ipv6),
            AddressFamily::V6 => self.service_ipv6.or(self.service_ipv4),
        }
    }

    /// What the worker should actually see as this pool's membership:
    /// its own nodes, or — while covering for a shortfall — the backup
    /// pool's current active addresses.
    pub fn effective_active_names(&self) -> Vec<String> {
        match &self.backup_active_names {
            Some(names) => names.clone(),
            None => self.active_node_names(),
        }
    }

    /// Recompute the intended active set per `spec.md` §4.5. `backup_active`
    /// is this pool's backup pool's own active node indices-by-name, passed
    /// in by the scheduler since pools do not hold references to each
    /// other directly.
    pub fn evaluate(&mut self, backup_active: Option<&[String]>) {
        let previous_active: Vec<usize> = self.active.clone();
        let mut active: Vec<usize> = Vec::new();
        let max = self.max_nodes as usize;
        let min = self.min_nodes as usize;

        // Step 1: sticky max-kept nodes that are still Up.
        for i in 0..self.nodes.len() {
            if self.nodes[i].max_kept && self.nodes[i].state() == NodeState::Up {
                if max == 0 || active.len() < max {
                    active.push(i);
                }
            }
        }

        // Step 2: remaining Up nodes in declaration order; clear max-kept
        // on anything that fell out of Up.
        for i in 0..self.nodes.len() {
            if active.contains(&i) {
                continue;
            }
            if self.nodes[i].state() == NodeState::Up {
                if max == 0 || active.len() < max {
                    active.push(i);
                    self.nodes[i].max_kept = true;
                }
            } else {
                self.nodes[i].max_kept = false;
            }
        }

        self.backup_pool_active = false;

        if active.len() >= min {
            for i in 0..self.nodes.len() {
                if !active.contains(&i) {
                    self.nodes[i].min_kept = false;
                }
            }
        } else {
            match self.fault_policy {
                FaultPolicy::ForceDown => {
                    active.clear();
                    for node in &mut self.nodes {
                        node.min_kept = false;
                    }
                }
                FaultPolicy::ForceUp => {
                    // Nodes that were part of the previous active set but
                    // dropped out of the ordinary Up set this pass are the
                    // ones actually responsible for the shortfall; they
                    // become this pass's min-kept candidates first.
                    for &i in &previous_active {
                        if !active.contains(&i) && !self.nodes[i].is_downtimed() {
                            self.nodes[i].min_kept = true;
                        }
                    }

                    for i in 0..self.nodes.len() {
                        if active.len() >= min {
                            break;
                        }
                        if active.contains(&i) {
                            continue;
                        }
                        if self.nodes[i].min_kept && self.nodes[i].administratively_up() {
                            active.push(i);
                        }
                    }
                    for i in 0..self.nodes.len() {
                        if active.len() >= min {
                            break;
                        }
                        if active.contains(&i) {
                            continue;
                        }
                        if self.nodes[i].administratively_up() {
                            active.push(i);
                            self.nodes[i].min_kept = true;
                        }
                    }
                }
                FaultPolicy::BackupPool => {
                    if let Some(names) = backup_active {
                        if !names.is_empty() {
                            self.backup_pool_active = true;
                            self.active = Vec::new();
                            self.synced = false;
                            self.state = PoolState::Up;
                            self.backup_active_names = Some(names.to_vec());
                            return;
                        }
                    }
                }
            }
        }

        self.backup_active_names = None;
        if active != previous_active {
            self.synced = false;
        }
        self.state = if active.is_empty() {
            PoolState::Down
        } else {
            PoolState::Up
        };
        self.active = active;
    }
}

/// Attaches one [`Probe`] per `(address-family, health check)` pair the
/// node actually has an address for (`spec.md` §3: "one probe per node,
/// address family, and check type"). Port resolution follows §4.2/§6:
/// an explicit `hc_port` wins, else DNS/Postgres fall back to their
/// protocol default, else the pool's own `port`.
fn attach_probes(node: &mut Node, cfg: &PoolConfig) {
    for hc in &cfg.health_checks {
        let port = resolve_port(hc.hc_port, hc.hc_type, cfg.port);
        let kind = ProbeKind::from_config(hc);
        if let Some(addr) = node.ipv4 {
            node.probes.push(Probe::new(kind.clone(), AddressFamily::V4, addr, port, hc));
        }
        if let Some(addr) = node.ipv6 {
            node.probes.push(Probe::new(kind.clone(), AddressFamily::V6, addr, port, hc));
        }
    }
}

fn resolve_port(explicit: Option<u16>, hc_type: HcType, pool_port: u16) -> u16 {
    explicit.unwrap_or(match hc_type {
        HcType::Dns => defaults::DNS_PORT,
        HcType::Postgres => defaults::POSTGRES_PORT,
        _ => pool_port,
    })
}

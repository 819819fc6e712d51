//! Node state machine: hard state derived from attached probes, overlaid
//! by an administrative state, plus the sticky flags the pool uses to
//! minimize active-set churn.
//!
//! Grounded on `examples/original_source/lb_node.cpp`: the `state()`
//! passthrough/override split, `start_downtime`/`end_downtime`, and
//! `parse_healthchecks_results()`'s "all probes up -> node up" aggregation
//! all carry over directly. The administrative overlay is generalized from
//! the original's two-value (`STATE_UP`/`STATE_DOWN`) admin state to the
//! five-value `AdminStateConfig` the configuration format exposes.

use std::net::IpAddr;

use crate::config::{AdminStateConfig, NodeConfig};
use crate::core::probe::{Outcome, Probe, ProbeState};

/// A node's fully-resolved state, after folding in the administrative
/// overlay. This is what pool logic and the worker message actually see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Up,
    Down,
    Drain,
    Downtime,
}

pub struct Node {
    pub name: String,
    pub ipv4: Option<IpAddr>,
    pub ipv6: Option<IpAddr>,
    pub admin_state: AdminStateConfig,
    pub probes: Vec<Probe>,
    /// Raw aggregation of probe hard states, before the admin overlay.
    hard_state: ProbeState,
    /// Set once every probe has produced at least one outcome.
    pub checked: bool,
    /// Last effective state seen by the owning pool, used to detect
    /// transitions worth notifying the pool about.
    last_notified_state: Option<NodeState>,
    pub state_changed: bool,
    pub min_kept: bool,
    pub max_kept: bool,
}

impl Node {
    pub fn new(name: String, cfg: &NodeConfig) -> Self {
        let ipv4 = cfg.ipv4.as_deref().and_then(|s| s.parse().ok());
        let ipv6 = cfg.ipv6.as_deref().and_then(|s| s.parse().ok());
        Self {
            name,
            ipv4,
            ipv6,
            admin_state: cfg.state,
            probes: Vec::new(),
            hard_state: ProbeState::Down,
            checked: false,
            last_notified_state: None,
            state_changed: false,
            min_kept: false,
            max_kept: false,
        }
    }

    /// Effective state a healthy, online node would have in its overlay
    /// tier, ignoring the current hard state — used by pool logic to
    /// decide which nodes are even eligible for ForceUp/min-kept
    /// selection regardless of how their probes are currently doing.
    pub fn administratively_up(&self) -> bool {
        matches!(
            self.admin_state,
            AdminStateConfig::Online | AdminStateConfig::DeployOnline
        )
    }

    pub fn is_downtimed(&self) -> bool {
        matches!(
            self.admin_state,
            AdminStateConfig::Maintenance | AdminStateConfig::Retired
        )
    }

    /// The fully-resolved state the pool reasons about.
    pub fn state(&self) -> NodeState {
        match self.admin_state {
            AdminStateConfig::Online | AdminStateConfig::DeployOnline => match self.hard_state {
                ProbeState::Up if self.checked => NodeState::Up,
                ProbeState::Drain => NodeState::Drain,
                _ => NodeState::Down,
            },
            AdminStateConfig::DeployOffline => NodeState::Drain,
            AdminStateConfig::Maintenance | AdminStateConfig::Retired => NodeState::Downtime,
        }
    }

    /// Apply one probe's outcome and recompute aggregation (`spec.md`
    /// §4.3/§4.4). Returns `Some(exit_code)` on a Panic outcome.
    pub fn apply_outcome(&mut self, probe_index: usize, outcome: Outcome) -> Option<i32> {
        // Downtimed nodes still accept outcomes so counters don't stay
        // frozen forever, but their effective state stays Downtime
        // regardless (see `state()`), so this never feeds pool
        // re-evaluation on its own.
        let exit_code = self.probes[probe_index].record_outcome(outcome);
        self.recompute();
        exit_code
    }

    fn recompute(&mut self) {
        if self.probes.iter().all(|p| p.checked) {
            self.checked = true;
        }
        self.hard_state = if self.probes.iter().any(|p| p.hard_state == ProbeState::Drain) {
            ProbeState::Drain
        } else if self.checked && self.probes.iter().all(|p| p.hard_state == ProbeState::Up) {
            ProbeState::Up
        } else {
            ProbeState::Down
        };

        let new_state = self.state();
        if self.last_notified_state != Some(new_state) {
            self.state_changed = true;
            self.last_notified_state = Some(new_state);
        }
    }

    /// Enter administrative downtime: immediate effective Down, idempotent.
    pub fn start_downtime(&mut self) {
        if self.is_downtimed() {
            return;
        }
        self.admin_state = AdminStateConfig::Maintenance;
        self.recompute();
    }

    /// Leave downtime. The node must not flap back to Up on stale probe
    /// state, so every probe is force-failed and the node waits for a
    /// fresh Pass.
    pub fn end_downtime(&mut self) {
        if !self.is_downtimed() {
            return;
        }
        self.admin_state = AdminStateConfig::Online;
        for probe in &mut self.probes {
            probe.force_down();
        }
        self.hard_state = ProbeState::Down;
        self.recompute();
    }

    /// Consume the `state_changed` flag; used by the scheduler to decide
    /// whether a pool evaluation pass is warranted this tick.
    pub fn take_state_changed(&mut self) -> bool {
        std::mem::take(&mut self.state_changed)
    }

    /// Apply an administrative state read back from a reloaded
    /// configuration document (the downtime-reload signal of `spec.md`
    /// §6). Routes through `start_downtime`/`end_downtime` so the
    /// "never flap back to Up on stale probe state" rule of §4.4 still
    /// applies to a reload exactly as it does to any other downtime
    /// transition.
    pub fn apply_admin_state(&mut self, new_state: AdminStateConfig) {
        if new_state == self.admin_state {
            return;
        }
        let was_downtimed = self.is_downtimed();
        self.admin_state = new_state;
        let now_downtimed = self.is_downtimed();

        if !was_downtimed && now_downtimed {
            // Entering downtime: immediate effective Down (handled by
            // `state()` reading the new admin_state), recompute to flag
            // the transition.
        } else if was_downtimed && !now_downtimed {
            // Leaving downtime: force every probe down so the node cannot
            // flap back to Up on stale probe state; it waits for a fresh
            // Pass, same as `end_downtime`.
            for probe in &mut self.probes {
                probe.force_down();
            }
            self.hard_state = ProbeState::Down;
        }
        self.recompute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;
    use crate::core::probe::{AddressFamily, ProbeKind};

    fn node_with_probes(n: usize) -> Node {
        let node_cfg = NodeConfig {
            ipv4: Some("10.0.0.1".to_string()),
            ipv6: None,
            state: AdminStateConfig::Online,
        };
        let mut node = Node::new("lbnode1".to_string(), &node_cfg);
        let hc = crate::config::HealthCheckConfig {
            hc_type: crate::config::HcType::Dummy,
            hc_port: None,
            hc_interval: defaults::HC_INTERVAL_SECS,
            hc_max_failed: 1,
            hc_timeout: defaults::HC_TIMEOUT_MS,
            hc_request: None,
            hc_host: None,
            hc_ok_codes: None,
            hc_query: None,
            dbname: None,
            user: None,
            function: None,
        };
        for _ in 0..n {
            node.probes.push(Probe::new(
                ProbeKind::Dummy,
                AddressFamily::V4,
                node.ipv4.unwrap(),
                0,
                &hc,
            ));
        }
        node
    }

    #[test]
    fn becomes_up_only_after_every_probe_passes() {
        let mut node = node_with_probes(2);
        node.apply_outcome(0, Outcome::Pass);
        assert_eq!(node.state(), NodeState::Down);
        node.apply_outcome(1, Outcome::Pass);
        assert_eq!(node.state(), NodeState::Up);
    }

    #[test]
    fn single_fail_with_threshold_one_brings_node_down() {
        let mut node = node_with_probes(1);
        node.apply_outcome(0, Outcome::Pass);
        assert_eq!(node.state(), NodeState::Up);
        node.apply_outcome(0, Outcome::Fail("x".to_string()));
        assert_eq!(node.state(), NodeState::Down);
    }

    #[test]
    fn downtime_is_immediate_and_survives_intervening_pass() {
        let mut node = node_with_probes(1);
        node.apply_outcome(0, Outcome::Pass);
        assert_eq!(node.state(), NodeState::Up);
        node.start_downtime();
        assert_eq!(node.state(), NodeState::Downtime);
        node.apply_outcome(0, Outcome::Pass);
        // still downtimed administratively regardless of probe outcome
        assert_eq!(node.state(), NodeState::Downtime);
        node.end_downtime();
        assert_eq!(node.state(), NodeState::Down);
        node.apply_outcome(0, Outcome::Pass);
        assert_eq!(node.state(), NodeState::Up);
    }

    #[test]
    fn drain_reports_regardless_of_other_probes() {
        let mut node = node_with_probes(2);
        node.apply_outcome(0, Outcome::Pass);
        node.apply_outcome(1, Outcome::Drain);
        assert_eq!(node.state(), NodeState::Drain);
    }

}

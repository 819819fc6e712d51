//! End-to-end scenarios driving `Pool`/`Node` state machines with Dummy
//! probe outcomes and checking the resulting worker reconciliation against
//! a [`MockFilter`], independent of the scheduler's timing and any real
//! network I/O.
//!
//! Grounded on `examples/original_source/testtool.cpp`'s scripted-outcome
//! harness: feed canned probe results, then inspect the filter table the
//! way that tool inspected `pfctl -t <table> -T show` after each step.

use std::collections::BTreeMap;

use lbhealthd::config::{AdminStateConfig, FaultPolicy, HcType, HealthCheckConfig, NodeConfig, PoolConfig};
use lbhealthd::core::pool::Pool;
use lbhealthd::core::probe::Outcome;
use lbhealthd::worker::filter::FilterControl;
use lbhealthd::worker::message::EntryState;
use lbhealthd::worker::{process, Entry, FilterMessage, MockFilter};

fn node_cfg(ipv4: &str) -> NodeConfig {
    NodeConfig {
        ipv4: Some(ipv4.to_string()),
        ipv6: None,
        state: AdminStateConfig::Online,
    }
}

fn dummy_hc(max_failed: u32) -> HealthCheckConfig {
    HealthCheckConfig {
        hc_type: HcType::Dummy,
        hc_port: None,
        hc_interval: 2,
        hc_max_failed: max_failed,
        hc_timeout: 1500,
        hc_request: None,
        hc_host: None,
        hc_ok_codes: None,
        hc_query: None,
        dbname: None,
        user: None,
        function: None,
    }
}

fn pool_cfg(
    table: &str,
    min_nodes: u32,
    max_nodes: u32,
    fault_policy: FaultPolicy,
    backup_pool: Option<&str>,
    nodes: &[(&str, &str)],
    max_failed: u32,
) -> PoolConfig {
    let mut node_map = BTreeMap::new();
    for (name, ipv4) in nodes {
        node_map.insert(name.to_string(), node_cfg(ipv4));
    }
    PoolConfig {
        service_ipv4: Some("10.0.0.100".to_string()),
        service_ipv6: None,
        table: table.to_string(),
        protocol: "tcp".to_string(),
        port: 80,
        min_nodes,
        max_nodes,
        min_nodes_action: fault_policy,
        backup_pool: backup_pool.map(str::to_string),
        nodes: node_map,
        health_checks: vec![dummy_hc(max_failed)],
    }
}

/// Applies `Outcome::Pass`/`Fail` to node `name`'s sole probe and runs the
/// pool's active-set evaluation with no backup pool in play.
fn pass(pool: &mut Pool, name: &str) {
    outcome(pool, name, Outcome::Pass);
}
fn fail(pool: &mut Pool, name: &str) {
    outcome(pool, name, Outcome::Fail("dummy failure".to_string()));
}
fn outcome(pool: &mut Pool, name: &str, outcome: Outcome) {
    let idx = pool.nodes.iter().position(|n| n.name == name).unwrap();
    pool.nodes[idx].apply_outcome(0, outcome);
}

fn filter_message(pool: &Pool) -> FilterMessage {
    let entries = pool
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let up = pool.active.contains(&i);
            let state = if up { EntryState::Up } else { EntryState::from(node.state()) };
            Entry {
                ipv4: node.ipv4.map(|a| a.to_string()),
                ipv6: node.ipv6.map(|a| a.to_string()),
                state,
                admin_state: node.admin_state,
            }
        })
        .collect();
    FilterMessage::new(pool.name.clone(), pool.table.clone(), entries)
}

/// Scenario 1 (`spec.md` §8): warm start from an empty filter table — every
/// node passes its first check and the whole set becomes active at once.
#[test]
fn warm_start_activates_every_passing_node() {
    let cfg = pool_cfg("web_backends", 0, 0, FaultPolicy::ForceDown, None, &[
        ("lbnode1", "10.0.0.1"),
        ("lbnode2", "10.0.0.2"),
        ("lbnode3", "10.0.0.3"),
    ], 3);
    let mut pool = Pool::new("web".to_string(), &cfg);

    pass(&mut pool, "lbnode1");
    pass(&mut pool, "lbnode2");
    pass(&mut pool, "lbnode3");
    pool.evaluate(None);

    assert_eq!(pool.active_node_names().len(), 3);

    let filter = MockFilter::new();
    process::reconcile(&filter, &filter_message(&pool), None);
    let members = filter.table_show("web_backends").unwrap();
    assert_eq!(members.len(), 3);
    assert!(members.contains(&"10.0.0.1".to_string()));
}

/// Scenario 2: default `hc_max_failed = 3` tolerates two failures but drops
/// the node on the third consecutive one.
#[test]
fn single_node_drops_only_after_threshold_consecutive_failures() {
    let cfg = pool_cfg("web_backends", 0, 0, FaultPolicy::ForceDown, None, &[
        ("lbnode1", "10.0.0.1"),
        ("lbnode2", "10.0.0.2"),
    ], 3);
    let mut pool = Pool::new("web".to_string(), &cfg);
    pass(&mut pool, "lbnode1");
    pass(&mut pool, "lbnode2");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names().len(), 2);

    fail(&mut pool, "lbnode1");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names().len(), 2, "one failure must not drop the node yet");

    fail(&mut pool, "lbnode1");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names().len(), 2, "two failures must not drop the node yet");

    fail(&mut pool, "lbnode1");
    pool.evaluate(None);
    let active = pool.active_node_names();
    assert_eq!(active, vec!["lbnode2".to_string()], "third consecutive failure drops lbnode1");
}

/// Scenario 3: `min_nodes = 2` with `ForceUp` keeps the pool at minimum by
/// promoting an administratively-up node back in, and — once that
/// emergency pick itself becomes the thing actually sustaining the pool and
/// later fails — it is lbnode2 (not the stale original pick) that gets
/// pulled back in to cover the shortfall.
#[test]
fn min_nodes_force_up_keeps_pool_at_minimum() {
    let cfg = pool_cfg("web_backends", 2, 0, FaultPolicy::ForceUp, None, &[
        ("lbnode1", "10.0.0.1"),
        ("lbnode2", "10.0.0.2"),
        ("lbnode3", "10.0.0.3"),
    ], 1);
    let mut pool = Pool::new("web".to_string(), &cfg);

    pass(&mut pool, "lbnode1");
    pass(&mut pool, "lbnode2");
    pass(&mut pool, "lbnode3");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names().len(), 3);

    // lbnode1 and lbnode3 both fail, leaving only lbnode2 genuinely Up —
    // below min_nodes, so ForceUp must promote one of the failed nodes back.
    fail(&mut pool, "lbnode1");
    fail(&mut pool, "lbnode3");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names().len(), 2, "ForceUp must restore the pool to min_nodes");
    assert!(pool.active_node_names().contains(&"lbnode2".to_string()));

    // Now lbnode2 — the node actually keeping the pool up — fails too.
    // The shortfall is its fault now, so it (not a stale pick) must be the
    // one re-promoted.
    fail(&mut pool, "lbnode2");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names().len(), 2);
    assert!(
        pool.active_node_names().contains(&"lbnode2".to_string()),
        "min-kept must track whoever is actually sustaining the pool, not a stale emergency pick"
    );
}

/// Scenario 4: `max_nodes = 2` keeps exactly two active even once a third
/// node starts passing, until one of the sticky max-kept nodes actually
/// drops out.
#[test]
fn max_nodes_caps_active_set_and_rotates_on_drop() {
    let cfg = pool_cfg("web_backends", 0, 2, FaultPolicy::ForceDown, None, &[
        ("lbnode1", "10.0.0.1"),
        ("lbnode2", "10.0.0.2"),
        ("lbnode3", "10.0.0.3"),
    ], 3);
    let mut pool = Pool::new("web".to_string(), &cfg);

    pass(&mut pool, "lbnode1");
    pass(&mut pool, "lbnode2");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names(), vec!["lbnode1".to_string(), "lbnode2".to_string()]);

    pass(&mut pool, "lbnode3");
    pool.evaluate(None);
    assert_eq!(
        pool.active_node_names().len(),
        2,
        "max_nodes must keep the cap even once a third node is healthy"
    );
    assert!(!pool.active_node_names().contains(&"lbnode3".to_string()));

    // lbnode1 drops out for good (three consecutive failures); lbnode3 now
    // has room to rotate in.
    fail(&mut pool, "lbnode1");
    fail(&mut pool, "lbnode1");
    fail(&mut pool, "lbnode1");
    pool.evaluate(None);
    let active = pool.active_node_names();
    assert_eq!(active.len(), 2);
    assert!(active.contains(&"lbnode2".to_string()));
    assert!(active.contains(&"lbnode3".to_string()));
}

/// Scenario 5: entering downtime takes effect immediately, before any probe
/// has a chance to fail it out, and the node does not flap back to Up on
/// stale probe state once downtime ends.
#[test]
fn downtime_takes_effect_immediately_and_does_not_flap_on_exit() {
    let cfg = pool_cfg("web_backends", 0, 0, FaultPolicy::ForceDown, None, &[
        ("lbnode1", "10.0.0.1"),
        ("lbnode2", "10.0.0.2"),
    ], 3);
    let mut pool = Pool::new("web".to_string(), &cfg);
    pass(&mut pool, "lbnode1");
    pass(&mut pool, "lbnode2");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names().len(), 2);

    let idx = pool.nodes.iter().position(|n| n.name == "lbnode1").unwrap();
    pool.nodes[idx].apply_admin_state(AdminStateConfig::Maintenance);
    pool.evaluate(None);
    assert_eq!(
        pool.active_node_names(),
        vec!["lbnode2".to_string()],
        "entering maintenance must remove the node from the active set on the same pass"
    );

    pool.nodes[idx].apply_admin_state(AdminStateConfig::Online);
    pool.evaluate(None);
    assert_eq!(
        pool.active_node_names(),
        vec!["lbnode2".to_string()],
        "leaving downtime must not resurrect the node on stale probe state"
    );

    pass(&mut pool, "lbnode1");
    pool.evaluate(None);
    assert_eq!(pool.active_node_names().len(), 2, "a fresh Pass after leaving downtime restores the node");
}

/// Scenario 6: when a pool with `min_nodes_action = backup_pool` drops
/// below its minimum, the worker is handed the backup pool's active set
/// instead, and reverts once the primary pool recovers.
#[test]
fn backup_pool_covers_shortfall_and_releases_on_recovery() {
    let primary_cfg = pool_cfg("web_backends", 1, 0, FaultPolicy::BackupPool, Some("standby"), &[
        ("lbnode1", "10.0.0.1"),
    ], 1);
    let backup_cfg = pool_cfg("standby_backends", 0, 0, FaultPolicy::ForceDown, None, &[
        ("lbnode9", "10.0.0.9"),
    ], 1);

    let mut primary = Pool::new("web".to_string(), &primary_cfg);
    let mut backup = Pool::new("standby".to_string(), &backup_cfg);

    pass(&mut backup, "lbnode9");
    backup.evaluate(None);
    assert_eq!(backup.active_node_names(), vec!["lbnode9".to_string()]);

    // Primary node fails; below min_nodes, so the backup pool takes over.
    fail(&mut primary, "lbnode1");
    primary.evaluate(Some(&backup.effective_active_names()));
    assert!(primary.backup_pool_active);
    assert_eq!(primary.effective_active_names(), vec!["lbnode9".to_string()]);

    let message = filter_message_for_backup(&primary, &backup);
    let filter = MockFilter::new();
    process::reconcile(&filter, &message, None);
    let members = filter.table_show("web_backends").unwrap();
    assert_eq!(members, vec!["10.0.0.9".to_string()]);

    // Primary recovers; the backup pool is released.
    pass(&mut primary, "lbnode1");
    primary.evaluate(Some(&backup.effective_active_names()));
    assert!(!primary.backup_pool_active);
    assert_eq!(primary.effective_active_names(), vec!["lbnode1".to_string()]);
}

/// A node that drops out of the active set without being in drain must be
/// removed from the table and have both src-node kill passes plus the
/// redirect-state kill issued, in that order (`spec.md` §4.6).
#[test]
fn reconcile_kills_src_nodes_and_rdr_states_on_non_drain_removal() {
    let filter = MockFilter::new();
    filter.table_add("web_backends", "10.0.0.1").unwrap();
    filter.table_add("web_backends", "10.0.0.2").unwrap();

    let message = FilterMessage::new(
        "web".to_string(),
        "web_backends".to_string(),
        vec![Entry {
            ipv4: Some("10.0.0.2".to_string()),
            ipv6: None,
            state: EntryState::Up,
            admin_state: AdminStateConfig::Online,
        }],
    );
    process::reconcile(&filter, &message, None);

    let members = filter.table_show("web_backends").unwrap();
    assert_eq!(members, vec!["10.0.0.2".to_string()]);

    let log = filter.kill_log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            "kill_src_nodes_to(web_backends, 10.0.0.1, true)".to_string(),
            "kill_states_to_rdr(web_backends, 10.0.0.1)".to_string(),
            "kill_src_nodes_to(web_backends, 10.0.0.1, true)".to_string(),
        ]
    );
}

/// A node removed while in drain (deploy-offline) must be dropped from the
/// table without any of the three kill calls, so in-flight connections are
/// allowed to finish on their own.
#[test]
fn reconcile_skips_all_kills_on_drain_removal() {
    let filter = MockFilter::new();
    filter.table_add("web_backends", "10.0.0.1").unwrap();

    let message = FilterMessage::new(
        "web".to_string(),
        "web_backends".to_string(),
        vec![Entry {
            ipv4: Some("10.0.0.1".to_string()),
            ipv6: None,
            state: EntryState::Drain,
            admin_state: AdminStateConfig::DeployOffline,
        }],
    );
    process::reconcile(&filter, &message, None);

    let members = filter.table_show("web_backends").unwrap();
    assert!(members.is_empty());
    assert!(filter.kill_log.lock().unwrap().is_empty());
}

fn filter_message_for_backup(primary: &Pool, backup: &Pool) -> FilterMessage {
    let entries = backup
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
        .collect();
    FilterMessage::new(primary.name.clone(), primary.table.clone(), entries)
}

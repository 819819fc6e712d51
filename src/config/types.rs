//! Structured configuration document: a TOML table keyed by pool name.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::defaults;

/// The whole configuration document: pool name -> pool definition.
pub type RootConfig = BTreeMap<String, PoolConfig>;

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub service_ipv4: Option<String>,
    pub service_ipv6: Option<String>,
    pub table: String,
    pub protocol: String,
    pub port: u16,
    #[serde(default)]
    pub min_nodes: u32,
    #[serde(default)]
    pub max_nodes: u32,
    #[serde(default)]
    pub min_nodes_action: FaultPolicy,
    pub backup_pool: Option<String>,
    pub nodes: BTreeMap<String, NodeConfig>,
    pub health_checks: Vec<HealthCheckConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    #[serde(default)]
    pub state: AdminStateConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminStateConfig {
    #[default]
    Online,
    DeployOnline,
    DeployOffline,
    Maintenance,
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    #[default]
    ForceDown,
    ForceUp,
    BackupPool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HcType {
    Http,
    Https,
    Tcp,
    Ping,
    Postgres,
    Dns,
    Dummy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    pub hc_type: HcType,
    /// Overrides the pool's `port` for this check; DNS/Postgres fall back
    /// to their protocol defaults when neither is set (`spec.md` §4.2/§6).
    #[serde(default)]
    pub hc_port: Option<u16>,
    #[serde(default = "default_hc_interval")]
    pub hc_interval: u64,
    #[serde(default = "default_hc_max_failed")]
    pub hc_max_failed: u32,
    #[serde(default = "default_hc_timeout")]
    pub hc_timeout: u64,

    // HTTP/HTTPS
    #[serde(default)]
    pub hc_request: Option<String>,
    #[serde(default)]
    pub hc_host: Option<String>,
    #[serde(default)]
    pub hc_ok_codes: Option<Vec<String>>,

    // DNS
    #[serde(default)]
    pub hc_query: Option<String>,

    // Postgres
    #[serde(default)]
    pub dbname: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
}

fn default_hc_interval() -> u64 {
    defaults::HC_INTERVAL_SECS
}
fn default_hc_max_failed() -> u32 {
    defaults::HC_MAX_FAILED
}
fn default_hc_timeout() -> u64 {
    defaults::HC_TIMEOUT_MS
}

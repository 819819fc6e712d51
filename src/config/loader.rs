//! Loading and validating the configuration document.

use std::path::Path;

use super::types::RootConfig;
use crate::error::ConfigError;

pub fn load_from_str(text: &str) -> Result<RootConfig, ConfigError> {
    let config: RootConfig = toml::from_str(text)?;
    validate(&config)?;
    Ok(config)
}

pub fn load_from_path(path: &Path) -> Result<RootConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    load_from_str(&text)
}

fn validate(config: &RootConfig) -> Result<(), ConfigError> {
    for (name, pool) in config {
        if pool.nodes.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "pool {name}: no nodes configured"
            )));
        }
        if pool.health_checks.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "pool {name}: no health checks configured"
            )));
        }
        if pool.max_nodes > 0 && pool.min_nodes > pool.max_nodes {
            return Err(ConfigError::Invalid(format!(
                "pool {name}: min_nodes ({}) exceeds max_nodes ({})",
                pool.min_nodes, pool.max_nodes
            )));
        }
        if pool.min_nodes_action == super::types::FaultPolicy::BackupPool {
            let Some(backup) = &pool.backup_pool else {
                return Err(ConfigError::Invalid(format!(
                    "pool {name}: min_nodes_action backup_pool requires backup_pool to be set"
                )));
            };
            if !config.contains_key(backup) {
                return Err(ConfigError::Invalid(format!(
                    "pool {name}: backup_pool '{backup}' is not a configured pool"
                )));
            }
        }
        for (node_name, node) in &pool.nodes {
            if node.ipv4.is_none() && node.ipv6.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "pool {name}, node {node_name}: needs at least one of ipv4/ipv6"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [web]
        table = "web_backends"
        protocol = "tcp"
        port = 443
        min_nodes = 1
        max_nodes = 0

        [web.nodes.lbnode1]
        ipv4 = "10.0.0.1"

        [[web.health_checks]]
        hc_type = "tcp"
        hc_port = 443
    "#;

    #[test]
    fn parses_minimal_document() {
        let config = load_from_str(MINIMAL).unwrap();
        assert_eq!(config.len(), 1);
        let pool = &config["web"];
        assert_eq!(pool.table, "web_backends");
        assert_eq!(pool.min_nodes, 1);
        assert_eq!(pool.health_checks[0].hc_interval, 2);
        assert_eq!(pool.health_checks[0].hc_max_failed, 3);
        assert_eq!(pool.health_checks[0].hc_timeout, 1500);
    }

    #[test]
    fn rejects_pool_without_nodes() {
        let text = r#"
            [web]
            table = "t"
            protocol = "tcp"
            port = 443
            nodes = {}
            health_checks = []
        "#;
        assert!(load_from_str(text).is_err());
    }

    #[test]
    fn rejects_dangling_backup_pool() {
        let text = r#"
            [web]
            table = "t"
            protocol = "tcp"
            port = 443
            min_nodes_action = "backup_pool"
            backup_pool = "ghost"

            [web.nodes.n1]
            ipv4 = "10.0.0.1"

            [[web.health_checks]]
            hc_type = "tcp"
            hc_port = 443
        "#;
        assert!(load_from_str(text).is_err());
    }

    #[test]
    fn rejects_min_exceeding_max() {
        let text = r#"
            [web]
            table = "t"
            protocol = "tcp"
            port = 443
            min_nodes = 5
            max_nodes = 2

            [web.nodes.n1]
            ipv4 = "10.0.0.1"

            [[web.health_checks]]
            hc_type = "tcp"
            hc_port = 443
        "#;
        assert!(load_from_str(text).is_err());
    }
}

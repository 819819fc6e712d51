//! Status file reporter: periodic snapshot consumed by an external
//! monitoring system (`spec.md` §2 component 7, §6 "Status output").
//!
//! Peripheral and interface-only per `spec.md` §1 ("status-file dumping
//! for the monitoring system" is explicitly out of scope for the decision
//! engine) — this module only owns *writing* the file in the specified
//! format; nothing reads it back or acts on its contents. Grounded on the
//! teacher's atomic temp-file-then-rename pattern in
//! `core/network/http_monitor.rs::write_state_atomic`.

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::core::pool::{Pool, PoolState};

/// One pool's contribution to the status file, computed by the caller
/// from live `Pool` state (this module stays a pure formatter/writer).
pub struct PoolStatus {
    pub table: String,
    pub nodes_alive: usize,
    pub backup_pool: BackupPoolStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPoolStatus {
    None,
    Configured,
    Active,
}

impl std::fmt::Display for BackupPoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackupPoolStatus::None => "none",
            BackupPoolStatus::Configured => "configured",
            BackupPoolStatus::Active => "active",
        };
        write!(f, "{s}")
    }
}

impl PoolStatus {
    pub fn from_pool(pool: &Pool) -> Self {
        let nodes_alive = if pool.backup_pool_active {
            pool.effective_active_names().len()
        } else {
            pool.active.len()
        };
        let backup_pool = match (&pool.backup_pool, pool.backup_pool_active, pool.state) {
            (_, true, _) => BackupPoolStatus::Active,
            (Some(_), false, _) => BackupPoolStatus::Configured,
            (None, _, PoolState::Up | PoolState::Down) => BackupPoolStatus::None,
        };
        Self {
            table: pool.table.clone(),
            nodes_alive,
            backup_pool,
        }
    }
}

pub fn render(pools: &[PoolStatus]) -> String {
    let mut out = format!("lbhealthd status as of {}\n", Local::now().to_rfc3339());
    for p in pools {
        out.push_str(&format!(
            "lbpool: {} nodes_alive: {} backup_pool: {}\n",
            p.table, p.nodes_alive, p.backup_pool
        ));
    }
    out
}

pub struct StatusReporter {
    path: PathBuf,
}

impl StatusReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn write(&self, pools: &[PoolStatus]) -> std::io::Result<()> {
        write_atomic(&self.path, &render(pools)).await
    }
}

async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_line_per_pool() {
        let pools = vec![
            PoolStatus {
                table: "web_backends".to_string(),
                nodes_alive: 3,
                backup_pool: BackupPoolStatus::None,
            },
            PoolStatus {
                table: "api_backends".to_string(),
                nodes_alive: 1,
                backup_pool: BackupPoolStatus::Active,
            },
        ];
        let rendered = render(&pools);
        let mut lines = rendered.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("lbhealthd status as of"));
        assert_eq!(
            lines.next().unwrap(),
            "lbpool: web_backends nodes_alive: 3 backup_pool: none"
        );
        assert_eq!(
            lines.next().unwrap(),
            "lbpool: api_backends nodes_alive: 1 backup_pool: active"
        );
    }

    #[tokio::test]
    async fn write_is_atomic_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.txt");
        let reporter = StatusReporter::new(&path);
        reporter.write(&[]).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}

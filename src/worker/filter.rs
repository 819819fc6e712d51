//! Filter control abstraction: the five logical operations `spec.md` §6
//! allows the driver to perform against the external packet filter, plus a
//! real implementation shelling out to the actual command-line tool and a
//! mock for tests.
//!
//! Command shapes are taken verbatim from
//! `examples/original_source/pfctl.cpp` (`pf_table_add`, `pf_table_del`,
//! `pf_is_in_table`/`pf_table_rebalance`'s `-T show`, `pf_kill_src_nodes_to`,
//! `pf_kill_states_to_rdr`). Unlike the original, which builds a shell
//! command string and pipes it through `popen`, this passes arguments
//! directly to `std::process::Command` — addresses and table names never
//! pass through a shell, so there is no quoting/injection surface to
//! replicate.

use std::sync::Arc;

use crate::error::FilterError;
use crate::logging::{Level, LogContext, Logger};

pub trait FilterControl: Send + Sync {
    fn table_add(&self, table: &str, address: &str) -> Result<(), FilterError>;
    fn table_del(&self, table: &str, address: &str) -> Result<(), FilterError>;
    fn table_show(&self, table: &str) -> Result<Vec<String>, FilterError>;
    fn kill_src_nodes_to(&self, table: &str, address: &str, with_states: bool) -> Result<(), FilterError>;
    fn kill_states_to_rdr(&self, table: &str, address: &str) -> Result<(), FilterError>;
}

/// Shells out to the real `pfctl` binary.
pub struct CommandFilter {
    binary: String,
    logger: Arc<Logger>,
}

impl CommandFilter {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            binary: "pfctl".to_string(),
            logger,
        }
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output, FilterError> {
        std::process::Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| FilterError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                detail: e.to_string(),
            })
    }

    fn require_success(&self, args: &[&str], output: std::process::Output) -> Result<(), FilterError> {
        if output.status.success() {
            Ok(())
        } else {
            Err(FilterError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                detail: format!("exit status {}", output.status),
            })
        }
    }
}

impl FilterControl for CommandFilter {
    fn table_add(&self, table: &str, address: &str) -> Result<(), FilterError> {
        let args = ["-q", "-t", table, "-T", "add", address];
        let output = self.run(&args)?;
        self.require_success(&args, output)
    }

    fn table_del(&self, table: &str, address: &str) -> Result<(), FilterError> {
        let args = ["-q", "-t", table, "-T", "del", address];
        let output = self.run(&args)?;
        self.require_success(&args, output)
    }

    fn table_show(&self, table: &str) -> Result<Vec<String>, FilterError> {
        let args = ["-q", "-t", table, "-T", "show"];
        let mut output = self.run(&args)?;
        if !output.status.success() {
            // Table doesn't exist yet on first read (`original_source/src/pfctl.cpp:141-157`,
            // `pf_get_table`'s fallback): create it empty and retry once.
            let create_args = ["-q", "-t", table, "-T", "add"];
            let create_output = self.run(&create_args)?;
            self.require_success(&create_args, create_output)?;
            output = self.run(&args)?;
            if !output.status.success() {
                return Err(FilterError::CommandFailed {
                    command: format!("{} {}", self.binary, args.join(" ")),
                    detail: format!("exit status {}", output.status),
                });
            }
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut addresses = Vec::new();
        for candidate in text.split_whitespace() {
            if candidate.parse::<std::net::IpAddr>().is_ok() {
                addresses.push(candidate.to_string());
            } else {
                // `spec.md` §6: any `table_show` line that is not a valid
                // IP literal is logged and dropped, never surfaced as an
                // error — a malformed table entry is the filter's problem,
                // not a reason to stall reconciliation.
                self.logger.log(
                    Level::Warn,
                    "filter",
                    "invalid_table_entry",
                    &format!("dropped non-IP line from table_show: {candidate}"),
                    &LogContext::pool(table.to_string()),
                );
            }
        }
        Ok(addresses)
    }

    fn kill_src_nodes_to(&self, table: &str, address: &str, with_states: bool) -> Result<(), FilterError> {
        let args: Vec<&str> = if with_states {
            vec!["-q", "-K", "table", "-K", table, "-K", "dsthost", "-K", address, "-K", "kill", "-K", "rststates"]
        } else {
            vec!["-q", "-K", "table", "-K", table, "-K", "dsthost", "-K", address]
        };
        let output = self.run(&args)?;
        self.require_success(&args, output)
    }

    fn kill_states_to_rdr(&self, table: &str, address: &str) -> Result<(), FilterError> {
        let args = [
            "-q", "-k", "table", "-k", table, "-k", "rdrhost", "-k", address, "-k", "kill", "-k", "rststates",
        ];
        let output = self.run(&args)?;
        self.require_success(&args, output)
    }
}

/// In-memory filter used by tests to assert on reconciliation behavior
/// without a real `pfctl` binary present.
pub struct MockFilter {
    pub tables: std::sync::Mutex<std::collections::HashMap<String, std::collections::BTreeSet<String>>>,
    pub kill_log: std::sync::Mutex<Vec<String>>,
}

impl MockFilter {
    pub fn new() -> Self {
        Self {
            tables: std::sync::Mutex::new(std::collections::HashMap::new()),
            kill_log: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl Default for MockFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterControl for MockFilter {
    fn table_add(&self, table: &str, address: &str) -> Result<(), FilterError> {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(address.to_string());
        Ok(())
    }

    fn table_del(&self, table: &str, address: &str) -> Result<(), FilterError> {
        if let Some(set) = self.tables.lock().unwrap().get_mut(table) {
            set.remove(address);
        }
        Ok(())
    }

    fn table_show(&self, table: &str) -> Result<Vec<String>, FilterError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn kill_src_nodes_to(&self, table: &str, address: &str, with_states: bool) -> Result<(), FilterError> {
        self.kill_log
            .lock()
            .unwrap()
            .push(format!("kill_src_nodes_to({table}, {address}, {with_states})"));
        Ok(())
    }

    fn kill_states_to_rdr(&self, table: &str, address: &str) -> Result<(), FilterError> {
        self.kill_log
            .lock()
            .unwrap()
            .push(format!("kill_states_to_rdr({table}, {address})"));
        Ok(())
    }
}

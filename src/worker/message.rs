//! The fixed-size IPC record handed across the worker channel, per
//! `spec.md` §6: pool name and table name each ≤256 bytes, up to 20
//! entries, each address string ≤46 bytes (the longest possible IPv6
//! literal plus a margin, same bound libc's `INET6_ADDRSTRLEN` uses).

use crate::config::AdminStateConfig;
use crate::core::node::NodeState;

pub const MAX_NAME_BYTES: usize = crate::config::defaults::MAX_NAME_BYTES;
pub const MAX_ADDRESS_BYTES: usize = crate::config::defaults::MAX_ADDRESS_BYTES;
pub const MAX_ENTRIES_PER_MESSAGE: usize = crate::config::defaults::MAX_ENTRIES_PER_MESSAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Up,
    Down,
    Drain,
    Downtime,
}

impl From<NodeState> for EntryState {
    fn from(state: NodeState) -> Self {
        match state {
            NodeState::Up => EntryState::Up,
            NodeState::Down => EntryState::Down,
            NodeState::Drain => EntryState::Drain,
            NodeState::Downtime => EntryState::Downtime,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub state: EntryState,
    pub admin_state: AdminStateConfig,
}

#[derive(Debug, Clone)]
pub struct FilterMessage {
    pub pool_name: String,
    pub table_name: String,
    pub entries: Vec<Entry>,
}

impl FilterMessage {
    /// Truncates `entries` to [`MAX_ENTRIES_PER_MESSAGE`] and both names to
    /// [`MAX_NAME_BYTES`], matching the IPC record's fixed-size contract.
    /// Over-capacity pools silently drop the excess (`spec.md` §6).
    pub fn new(pool_name: String, table_name: String, mut entries: Vec<Entry>) -> Self {
        entries.truncate(MAX_ENTRIES_PER_MESSAGE);
        for entry in &mut entries {
            if let Some(addr) = &mut entry.ipv4 {
                addr.truncate(MAX_ADDRESS_BYTES);
            }
            if let Some(addr) = &mut entry.ipv6 {
                addr.truncate(MAX_ADDRESS_BYTES);
            }
        }
        Self {
            pool_name: truncate_bytes(pool_name, MAX_NAME_BYTES),
            table_name: truncate_bytes(table_name, MAX_NAME_BYTES),
            entries,
        }
    }
}

fn truncate_bytes(mut s: String, max: usize) -> String {
    while s.len() > max {
        s.pop();
    }
    s
}

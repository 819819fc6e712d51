//! Worker IPC: the bounded channel and the reconciliation loop driving the
//! external filter, modeled as a dedicated thread rather than a forked
//! process (see `channel.rs` for why that substitution is faithful here).

pub mod channel;
pub mod filter;
pub mod message;
pub mod process;

pub use channel::{worker_channel, WorkerSender};
pub use filter::{CommandFilter, FilterControl, MockFilter};
pub use message::{Entry, EntryState, FilterMessage};
pub use process::spawn_worker;

//! Health-check driver for an IP-level load balancer.
//!
//! Probes application endpoints behind a set of virtual services,
//! decides which backend addresses should currently receive traffic, and
//! reconciles that decision with a kernel packet-filter table through a
//! dedicated worker. See `DESIGN.md` for how each module is grounded.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod status;
pub mod worker;

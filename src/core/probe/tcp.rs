//! Plain TCP connect probe, grounded on the teacher's pattern for awaiting
//! a network round trip with `tokio::net` directly rather than hand-rolled
//! readiness polling (see `other_examples/14ccc0ba_...health.rs.rs`).

use std::net::SocketAddr;
use tokio::net::TcpStream;

use super::{Outcome, ProbeSpec};

pub async fn run(spec: &ProbeSpec) -> Outcome {
    let addr = SocketAddr::new(spec.address, spec.port);
    match TcpStream::connect(addr).await {
        Ok(_stream) => Outcome::Pass,
        Err(e) => Outcome::Fail(format!("connect failed: {e}")),
    }
}

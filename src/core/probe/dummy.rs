//! Test-only probe whose outcomes are pushed into the queue ahead of time
//! by the scenario harness, letting `tests/scenarios.rs` drive the node and
//! pool state machines deterministically without any real I/O.
//!
//! Dummy probes never go through [`super::run_probe`] — they have no
//! network round trip to await, so the scheduler pops their queued outcome
//! synchronously in the same pass where it decides a probe is due.

use super::Outcome;

/// Pop the next queued outcome, or fail loudly if the scenario forgot to
/// queue one for this tick.
pub fn next(queue: &mut std::collections::VecDeque<Outcome>) -> Outcome {
    queue
        .pop_front()
        .unwrap_or_else(|| Outcome::Fail("dummy probe: no outcome queued".to_string()))
}

pub mod clock;
pub mod node;
pub mod pool;
pub mod probe;
pub mod scheduler;

pub use clock::{Clock, SystemClock};
pub use node::{Node, NodeState};
pub use pool::{Pool, PoolState};
pub use scheduler::Scheduler;

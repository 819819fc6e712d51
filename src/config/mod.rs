pub mod defaults;
pub mod loader;
pub mod types;

pub use loader::{load_from_path, load_from_str};
pub use types::{AdminStateConfig, FaultPolicy, HcType, HealthCheckConfig, NodeConfig, PoolConfig, RootConfig};

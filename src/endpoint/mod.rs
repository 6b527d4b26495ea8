//! RPC endpoint pool and health tracking

pub mod health;
pub mod pool;

pub use health::{HealthPolicy, HealthSnapshot, HealthTracker};
pub use pool::{Endpoint, EndpointPool, EndpointStatus};

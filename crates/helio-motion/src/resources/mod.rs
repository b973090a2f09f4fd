//! Transient render target management

mod pool;

pub use pool::{PoolStats, TargetKey, TargetPool};

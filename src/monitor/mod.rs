//! Background monitors: application health probes, container stats sampling
//! and server liveness

pub mod health;
pub mod servers;
pub mod stats;

pub use health::HealthMonitor;
pub use servers::ServerMonitor;
pub use stats::StatsMonitor;

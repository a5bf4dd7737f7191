//! HTTP health-check and alerting service.
//!
//! Targets are probed on a wall-clock cadence, every probe is stored as a
//! time-series point, a per-target up/down state is derived with hysteresis
//! and confirmed transitions are delivered to the target owner.

pub mod alerting;
pub mod config;
pub mod database;
pub mod error;
pub mod metrics;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod retry;

pub use config::Config;
pub use orchestrator::Orchestrator;

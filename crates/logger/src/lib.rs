//! Shared tracing setup for the watchdog binaries.

mod subscriber;

pub use subscriber::{LogFormat, init_tracing, init_tracing_with};

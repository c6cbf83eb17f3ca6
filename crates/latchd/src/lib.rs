//! latchd - door latch device daemon.
//!
//! Drives the lock actuator from UDP commands, keeps firmware current
//! against the registry and answers status queries, all from one
//! cooperative loop.

pub mod actuator;
pub mod agent;
pub mod client;
pub mod command;
pub mod config;
pub mod daemon;
pub mod lock;
pub mod scheduler;
pub mod status;

/// Firmware version this build reports to the registry.
pub const RUNNING_VERSION: &str = env!("LATCHD_FIRMWARE_VERSION");

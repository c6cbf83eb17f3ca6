//! Latch Common - shared types for the firmware registry and the door device.
//!
//! Wire types, the error taxonomy, checksum helpers and logging setup used by
//! `otad`, `latchd` and `latchctl`.

pub mod checksum;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod types;

pub use checksum::*;
pub use error::{LatchError, Result};
pub use protocol::*;
pub use types::*;

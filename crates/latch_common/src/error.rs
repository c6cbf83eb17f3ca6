//! Error taxonomy shared by the registry and the device.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LatchError>;

#[derive(Error, Debug)]
pub enum LatchError {
    /// Missing or malformed request fields. Never retried by the server.
    #[error("Invalid request: {0}")]
    ClientInput(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Firmware not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Device cannot reach the registry. Recovery waits for the next scheduled check.
    #[error("Registry unreachable: {0}")]
    Connectivity(String),

    /// Downloaded payload failed verification and must not be installed.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LatchError {
    /// HTTP status equivalent for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            LatchError::ClientInput(_) => 400,
            LatchError::PayloadTooLarge { .. } => 413,
            LatchError::NotFound(_) => 404,
            LatchError::Storage(_) | LatchError::Io(_) | LatchError::Json(_) => 500,
            LatchError::Connectivity(_) => 503,
            LatchError::Integrity(_) | LatchError::Protocol(_) => 502,
            LatchError::Timeout(_) => 504,
        }
    }

    /// Short machine-readable kind, used in status reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LatchError::ClientInput(_) => "client_input",
            LatchError::PayloadTooLarge { .. } => "payload_too_large",
            LatchError::NotFound(_) => "not_found",
            LatchError::Storage(_) | LatchError::Io(_) => "storage",
            LatchError::Json(_) => "json",
            LatchError::Connectivity(_) => "connectivity",
            LatchError::Integrity(_) => "integrity",
            LatchError::Protocol(_) => "protocol",
            LatchError::Timeout(_) => "timeout",
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

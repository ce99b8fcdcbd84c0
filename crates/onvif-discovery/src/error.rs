//! Discovery error types

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;
use thiserror::Error;

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// A reply that could not be used
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeFailure {
    pub message: String,
    /// Raw datagram text, empty when receiving failed
    pub payload: String,
    /// Reply source, or the probe target when receiving failed
    pub from: SocketAddr,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {})", self.message, self.from)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// At least one reply was malformed or could not be received; valid
    /// devices were still announced
    #[error("{} failed discovery replies ({devices} devices found)", .errors.len())]
    Probe {
        errors: Vec<ProbeFailure>,
        devices: usize,
    },
}

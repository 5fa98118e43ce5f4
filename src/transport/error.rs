//! Transport error types

use thiserror::Error;

use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Transport closed")]
    Closed,
}

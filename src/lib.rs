//! Termplex - terminal session multiplexer
//!
//! Opens SSH, telnet, raw TCP, serial, local subprocess and monitor
//! connections from saved profiles and exposes every open connection as a
//! uniform, timestamped message stream.
//!
//! # Layout
//! - [`profile`] - connection profiles and the persisted registry
//! - [`transport`] - per-kind connectors (connect / read / write / teardown)
//! - [`ssh`] - russh client and interactive shell channel
//! - [`session`] - session multiplexer, message log, reconnect policy
//! - [`commands`] - the façade a UI or CLI drives
//! - [`config`] - storage paths and runtime settings

pub mod commands;
pub mod config;
pub mod error;
pub mod profile;
pub mod session;
pub mod ssh;
pub mod transport;

pub use commands::TerminalService;
pub use error::TerminalError;
pub use profile::{ConnectionProfile, ConnectionRegistry, ConnectionStatus, TransportKind};
pub use session::{MessageKind, SessionEvent, SessionInfo, SessionMessage, SessionMultiplexer};

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file name inside [`config::log_dir`]
pub const LOG_FILE_NAME: &str = "termplex.log";

/// Initialize logging
///
/// Honors `RUST_LOG`, defaults to `info`. Logs go to stdout and are appended
/// to `termplex.log` in the log directory when it can be created. Safe to
/// call more than once; only the first call installs the subscriber.
pub fn init_logging() {
    let file_layer = config::log_dir()
        .ok()
        .and_then(|dir| open_log_file(&dir))
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
        });

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init();
}

fn open_log_file(dir: &Path) -> Option<File> {
    std::fs::create_dir_all(dir).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_created_in_nested_dir() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("logs");

        assert!(open_log_file(&dir).is_some());
        assert!(dir.join(LOG_FILE_NAME).is_file());
        // Reopening appends to the same file
        assert!(open_log_file(&dir).is_some());
    }
}

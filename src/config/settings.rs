//! Runtime settings
//!
//! Loaded once at startup from `settings.json` in the config directory.
//! Every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::storage::{config_dir, StorageError};
use crate::session::ReconnectConfig;

/// Settings file name inside the config directory
pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Upper bound for any transport handshake, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Messages kept per session log; older entries are evicted
    #[serde(default = "default_max_log_messages")]
    pub max_log_messages: usize,

    /// Read buffer size for socket, serial and process readers
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Backoff policy for profiles with auto-reconnect enabled
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_max_log_messages() -> usize {
    10_000
}

fn default_read_buffer_size() -> usize {
    8192
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            max_log_messages: default_max_log_messages(),
            read_buffer_size: default_read_buffer_size(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default location, falling back to defaults
    pub async fn load_default() -> Self {
        match config_dir() {
            Ok(dir) => Self::load_from(&dir.join(SETTINGS_FILE_NAME)).await,
            Err(e) => {
                tracing::warn!("No config directory ({}), using default settings", e);
                Self::default()
            }
        }
    }

    /// Load settings from `path`
    ///
    /// Missing or unreadable files yield the defaults.
    pub async fn load_from(path: &Path) -> Self {
        match Self::try_load(path).await {
            Ok(Some(settings)) => settings,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read settings from {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    async fn try_load(path: &Path) -> Result<Option<Self>, StorageError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Clamp values that would make the multiplexer unusable
    pub fn normalized(mut self) -> Self {
        self.connect_timeout_secs = self.connect_timeout_secs.max(1);
        self.max_log_messages = self.max_log_messages.max(16);
        self.read_buffer_size = self.read_buffer_size.clamp(256, 1 << 20);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.connect_timeout_secs, 15);
        assert_eq!(settings.max_log_messages, 10_000);
        assert_eq!(settings.read_buffer_size, 8192);
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"connectTimeoutSecs": 3}"#).unwrap();

        let settings = Settings::load_from(&path).await;
        assert_eq!(settings.connect_timeout_secs, 3);
        assert_eq!(settings.max_log_messages, 10_000);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "not json").unwrap();

        let settings = Settings::load_from(&path).await;
        assert_eq!(settings.connect_timeout_secs, 15);
    }

    #[test]
    fn test_normalized_clamps() {
        let settings = Settings {
            connect_timeout_secs: 0,
            max_log_messages: 0,
            read_buffer_size: 1,
            ..Settings::default()
        }
        .normalized();
        assert_eq!(settings.connect_timeout_secs, 1);
        assert_eq!(settings.max_log_messages, 16);
        assert_eq!(settings.read_buffer_size, 256);
    }
}

//! Profile Storage
//!
//! Reads and writes the terminal profile store on disk.
//! Location: ~/.termplex on macOS/Linux, %APPDATA%\Termplex on Windows

use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::profile::ProfileRecord;

/// Profile store file name inside the config directory
pub const PROFILES_FILE_NAME: &str = "terminal_profiles.json";

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Get the Termplex configuration directory
/// Returns %APPDATA%\Termplex on Windows, ~/.termplex on macOS/Linux
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("Termplex"));
        }
        dirs::home_dir()
            .map(|home| home.join(".termplex"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".termplex"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Get the log directory
pub fn log_dir() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("logs"))
}

/// Resolve a leading `~/` against the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Get the profile store path
pub fn profiles_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join(PROFILES_FILE_NAME))
}

/// Profile store on disk: a JSON array of [`ProfileRecord`]s
pub struct ProfileStorage {
    path: PathBuf,
}

impl ProfileStorage {
    /// Create a storage manager with the default path
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            path: profiles_file()?,
        })
    }

    /// Create storage manager with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Load all records from disk
    ///
    /// A missing file is an empty store. A document that is not a JSON array
    /// is backed up and treated as empty. Individual records that fail to
    /// parse are skipped.
    pub async fn load(&self) -> Result<Vec<ProfileRecord>, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let values = match serde_json::from_str::<Vec<serde_json::Value>>(&contents) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Profile store corrupted: {}", e);
                match self.backup().await {
                    Ok(backup_path) => tracing::warn!(
                        "Corrupted profile store backed up to {:?}, starting empty",
                        backup_path
                    ),
                    Err(backup_err) => {
                        tracing::error!("Failed to backup corrupted profile store: {}", backup_err)
                    }
                }
                return Ok(Vec::new());
            }
        };

        let mut records = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<ProfileRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping malformed profile record #{}: {}", index, e),
            }
        }
        Ok(records)
    }

    /// Save all records (temp file + rename)
    pub async fn save(&self, records: &[ProfileRecord]) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(records)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    /// Check if the store file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Create a backup of the current store
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if self.exists().await {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}

//! Configuration Management Module
//!
//! Storage locations, the on-disk profile store, and runtime settings.

pub mod settings;
pub mod storage;

pub use settings::{Settings, SETTINGS_FILE_NAME};
pub use storage::{config_dir, expand_home, log_dir, profiles_file, ProfileStorage, StorageError};

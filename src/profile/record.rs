//! Persisted form of a profile
//!
//! One flat record per profile. Kind-specific parameters are stored as a
//! JSON string next to the kind tag and rebuilt polymorphically on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ConnectionProfile, ConnectionStatus, TransportKind, TransportParams};
use crate::error::TerminalError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: String,
    #[serde(default)]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(default = "default_width")]
    pub terminal_width: u16,
    #[serde(default = "default_height")]
    pub terminal_height: u16,
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default)]
    pub configuration_json: String,
}

fn default_width() -> u16 {
    80
}

fn default_height() -> u16 {
    24
}

/// Why a record could not be turned back into a profile
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Kind(#[from] TerminalError),

    #[error("invalid configuration: {0}")]
    Configuration(#[from] serde_json::Error),
}

impl ProfileRecord {
    pub fn from_profile(profile: &ConnectionProfile) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            description: profile.description.clone(),
            kind: profile.kind().tag().to_string(),
            last_connected: profile.last_connected,
            terminal_width: profile.terminal_width,
            terminal_height: profile.terminal_height,
            auto_reconnect: profile.auto_reconnect,
            configuration_json: profile.params.to_configuration_json()?,
        })
    }

    /// Rebuild the profile. Status is always reset to disconnected.
    pub fn into_profile(self) -> Result<ConnectionProfile, RecordError> {
        let kind: TransportKind = self.kind.parse()?;
        let params = TransportParams::from_configuration_json(kind, &self.configuration_json)?;

        Ok(ConnectionProfile {
            id: self.id,
            name: self.name,
            description: self.description,
            params,
            last_connected: self.last_connected,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            auto_reconnect: self.auto_reconnect,
            status: ConnectionStatus::Disconnected,
            last_error: None,
        })
    }
}

//! Connection Registry
//!
//! Owns the saved profiles, assigns ids, keeps names unique and persists the
//! whole index after every mutation. One instance is built at startup and
//! shared through an `Arc`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::record::ProfileRecord;
use super::types::{ConnectionProfile, ConnectionStatus, TransportKind};
use super::upstream::{UpstreamInfo, UpstreamSource};
use crate::config::ProfileStorage;
use crate::error::TerminalError;

pub struct ConnectionRegistry {
    /// Profiles in insertion order. Held across the persistence write so
    /// every read-modify-write cycle is serialized.
    profiles: Mutex<Vec<ConnectionProfile>>,
    /// None keeps the registry in memory only
    storage: Option<ProfileStorage>,
    upstreams: Option<Arc<dyn UpstreamSource>>,
}

impl ConnectionRegistry {
    /// Load the registry from `storage`
    ///
    /// Records with an unknown kind or a broken configuration are skipped.
    /// A store that cannot be read at all starts the registry empty.
    pub async fn load(storage: ProfileStorage) -> Self {
        let records = match storage.load().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to load profiles from {:?}: {}", storage.path(), e);
                Vec::new()
            }
        };

        let mut profiles = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id.clone();
            match record.into_profile() {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!("Skipping profile {}: {}", id, e),
            }
        }

        info!("Loaded {} terminal profiles", profiles.len());

        Self {
            profiles: Mutex::new(profiles),
            storage: Some(storage),
            upstreams: None,
        }
    }

    /// Registry without persistence (for testing)
    pub fn in_memory() -> Self {
        Self {
            profiles: Mutex::new(Vec::new()),
            storage: None,
            upstreams: None,
        }
    }

    /// Attach the upstream source used by monitor profiles
    pub fn with_upstreams(mut self, upstreams: Arc<dyn UpstreamSource>) -> Self {
        self.upstreams = Some(upstreams);
        self
    }

    pub fn upstreams(&self) -> Option<&Arc<dyn UpstreamSource>> {
        self.upstreams.as_ref()
    }

    /// New unsaved profile of `kind`
    pub fn create(kind: TransportKind) -> ConnectionProfile {
        ConnectionProfile::new(kind)
    }

    /// New unsaved profile from a kind tag
    pub fn create_from_tag(tag: &str) -> Result<ConnectionProfile, TerminalError> {
        Ok(Self::create(tag.parse()?))
    }

    /// Store a new profile and return it as stored
    ///
    /// Assigns an id when missing and suffixes the name with ` (N)` when it
    /// collides (case-insensitive) with an existing profile.
    pub async fn add(&self, mut profile: ConnectionProfile) -> ConnectionProfile {
        let mut profiles = self.profiles.lock().await;

        if profile.id.trim().is_empty() || profiles.iter().any(|p| p.id == profile.id) {
            profile.id = uuid::Uuid::new_v4().to_string();
        }
        profile.name = unique_name(&profile.name, profiles.iter().map(|p| p.name.as_str()));
        profile.status = ConnectionStatus::Disconnected;
        profile.last_error = None;

        info!(
            "Adding {} profile {} ({})",
            profile.kind(),
            profile.id,
            profile.name
        );

        profiles.push(profile.clone());
        self.persist(&profiles).await;
        profile
    }

    /// Replace the stored profile with the same id
    ///
    /// Returns `Ok(false)` when no such profile exists. The transport kind
    /// of a stored profile cannot change.
    pub async fn update(&self, mut profile: ConnectionProfile) -> Result<bool, TerminalError> {
        let mut profiles = self.profiles.lock().await;

        let Some(index) = profiles.iter().position(|p| p.id == profile.id) else {
            debug!("Update ignored, unknown profile {}", profile.id);
            return Ok(false);
        };

        let existing = &profiles[index];
        if existing.kind() != profile.kind() {
            return Err(TerminalError::KindChanged);
        }

        profile.name = unique_name(
            &profile.name,
            profiles
                .iter()
                .filter(|p| p.id != profile.id)
                .map(|p| p.name.as_str()),
        );
        // Runtime state belongs to the registry, not the caller's copy
        profile.status = existing.status;
        profile.last_error = existing.last_error.clone();

        profiles[index] = profile;
        self.persist(&profiles).await;
        Ok(true)
    }

    /// Delete a profile. Returns whether it existed.
    ///
    /// Closing an active session first is the multiplexer's job, see
    /// `SessionMultiplexer::remove_profile`.
    pub async fn remove(&self, id: &str) -> bool {
        let mut profiles = self.profiles.lock().await;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);

        if profiles.len() == before {
            return false;
        }

        info!("Removed profile {}", id);
        self.persist(&profiles).await;
        true
    }

    pub async fn get(&self, id: &str) -> Option<ConnectionProfile> {
        self.profiles
            .lock()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub async fn list(&self) -> Vec<ConnectionProfile> {
        self.profiles.lock().await.clone()
    }

    /// Upstreams a monitor profile can currently attach to
    pub async fn list_by_kind_available_for_monitoring(&self) -> Vec<UpstreamInfo> {
        match &self.upstreams {
            Some(source) => source.list_connectable_upstreams().await,
            None => Vec::new(),
        }
    }

    /// Update runtime status. Not persisted.
    pub async fn set_status(&self, id: &str, status: ConnectionStatus, error: Option<String>) {
        let mut profiles = self.profiles.lock().await;
        if let Some(profile) = profiles.iter_mut().find(|p| p.id == id) {
            debug!("Profile {} status -> {:?}", id, status);
            profile.status = status;
            profile.last_error = error;
        }
    }

    /// Record a successful connection and persist the timestamp
    pub async fn mark_connected(&self, id: &str, at: DateTime<Utc>) {
        let mut profiles = self.profiles.lock().await;
        let Some(profile) = profiles.iter_mut().find(|p| p.id == id) else {
            return;
        };
        profile.status = ConnectionStatus::Connected;
        profile.last_error = None;
        profile.last_connected = Some(at);
        self.persist(&profiles).await;
    }

    /// Write the whole index. Failures are logged and swallowed; the
    /// in-memory state stays authoritative.
    async fn persist(&self, profiles: &[ConnectionProfile]) {
        let Some(storage) = &self.storage else {
            return;
        };

        let mut records = Vec::with_capacity(profiles.len());
        for profile in profiles {
            match ProfileRecord::from_profile(profile) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Failed to serialize profile {}: {}", profile.id, e),
            }
        }

        if let Err(e) = storage.save(&records).await {
            warn!("Failed to persist profiles to {:?}: {}", storage.path(), e);
        }
    }
}

/// First of `desired`, `desired (1)`, `desired (2)`, ... not already taken
fn unique_name<'a>(desired: &str, existing: impl Iterator<Item = &'a str>) -> String {
    let taken: HashSet<String> = existing.map(|n| n.to_lowercase()).collect();
    if !taken.contains(&desired.to_lowercase()) {
        return desired.to_string();
    }

    let mut n = 1u32;
    loop {
        let candidate = format!("{} ({})", desired, n);
        if !taken.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

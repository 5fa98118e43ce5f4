//! Commands module
//!
//! [`TerminalService`] is the façade a UI or CLI drives. Every command
//! returns `Result<_, TerminalError>`; the error serializes as its message.
//!
//! # Commands
//!
//! - `list_profiles` / `create_profile` / `save_profile` / `delete_profile`
//! - `list_monitor_sources` - upstreams a monitor profile can attach to
//! - `open_session` / `close_session` / `dismiss_session`
//! - `send` / `send_line` / `resize_session`
//! - `get_active_session` / `list_sessions` / `messages_since` / `subscribe`

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{ProfileStorage, Settings};
use crate::error::TerminalError;
use crate::profile::{
    ConnectionProfile, ConnectionRegistry, TransportKind, UpstreamInfo, UpstreamSource,
};
use crate::session::{SessionEvent, SessionInfo, SessionMessage, SessionMultiplexer};

/// Transport kind as offered in a "new connection" picker
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportKindInfo {
    pub kind: TransportKind,
    pub label: &'static str,
    pub read_only: bool,
}

pub struct TerminalService {
    registry: Arc<ConnectionRegistry>,
    multiplexer: SessionMultiplexer,
}

impl TerminalService {
    pub fn new(registry: Arc<ConnectionRegistry>, settings: Settings) -> Self {
        let multiplexer = SessionMultiplexer::new(registry.clone(), settings);
        Self {
            registry,
            multiplexer,
        }
    }

    /// Load settings and profiles from the default config directory
    pub async fn bootstrap(
        upstreams: Option<Arc<dyn UpstreamSource>>,
    ) -> Result<Self, TerminalError> {
        let settings = Settings::load_default().await;
        let storage = ProfileStorage::new()?;
        Ok(Self::bootstrap_with(storage, settings, upstreams).await)
    }

    pub async fn bootstrap_with(
        storage: ProfileStorage,
        settings: Settings,
        upstreams: Option<Arc<dyn UpstreamSource>>,
    ) -> Self {
        info!("Loading terminal profiles from {:?}", storage.path());
        let mut registry = ConnectionRegistry::load(storage).await;
        if let Some(upstreams) = upstreams {
            registry = registry.with_upstreams(upstreams);
        }
        Self::new(Arc::new(registry), settings)
    }

    pub fn multiplexer(&self) -> &SessionMultiplexer {
        &self.multiplexer
    }

    // ── Profiles ────────────────────────────────────────────────────────

    pub async fn list_profiles(&self) -> Vec<ConnectionProfile> {
        self.registry.list().await
    }

    pub async fn get_profile(&self, profile_id: &str) -> Result<ConnectionProfile, TerminalError> {
        self.registry
            .get(profile_id)
            .await
            .ok_or_else(|| TerminalError::ProfileNotFound(profile_id.to_string()))
    }

    pub fn list_transport_kinds(&self) -> Vec<TransportKindInfo> {
        TransportKind::ALL
            .iter()
            .map(|kind| TransportKindInfo {
                kind: *kind,
                label: kind.label(),
                read_only: kind.is_read_only(),
            })
            .collect()
    }

    /// Unsaved draft with per-kind defaults
    pub fn create_profile(&self, kind: &str) -> Result<ConnectionProfile, TerminalError> {
        ConnectionRegistry::create_from_tag(kind)
    }

    /// Insert or update; returns the profile as stored
    pub async fn save_profile(
        &self,
        profile: ConnectionProfile,
    ) -> Result<ConnectionProfile, TerminalError> {
        if !profile.id.is_empty() && self.registry.update(profile.clone()).await? {
            return self.get_profile(&profile.id).await;
        }
        Ok(self.registry.add(profile).await)
    }

    /// Close the profile's session (if any) and delete it
    pub async fn delete_profile(&self, profile_id: &str) -> Result<bool, TerminalError> {
        self.multiplexer.remove_profile(profile_id).await
    }

    pub async fn list_monitor_sources(&self) -> Vec<UpstreamInfo> {
        self.registry.list_by_kind_available_for_monitoring().await
    }

    // ── Sessions ────────────────────────────────────────────────────────

    pub async fn open_session(&self, profile_id: &str) -> Result<SessionInfo, TerminalError> {
        self.multiplexer.open(profile_id).await
    }

    pub async fn close_session(&self, session_id: &str) -> Result<(), TerminalError> {
        self.multiplexer.close(session_id).await
    }

    /// Close and forget a session
    pub async fn dismiss_session(&self, session_id: &str) -> Result<(), TerminalError> {
        self.multiplexer.dismiss(session_id).await
    }

    pub async fn send(&self, session_id: &str, data: &str) -> Result<(), TerminalError> {
        self.multiplexer.send(session_id, data).await
    }

    /// Send `line`, adding the session's line terminator when missing
    pub async fn send_line(&self, session_id: &str, line: &str) -> Result<(), TerminalError> {
        let session = self
            .multiplexer
            .session(session_id)
            .ok_or_else(|| TerminalError::SessionNotFound(session_id.to_string()))?;

        if line.ends_with('\n') {
            return self.multiplexer.send(session_id, line).await;
        }

        let terminated = format!("{}{}", line, line_terminator(session.kind));
        self.multiplexer.send(session_id, &terminated).await
    }

    pub async fn resize_session(
        &self,
        session_id: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(), TerminalError> {
        self.multiplexer.resize(session_id, cols, rows).await
    }

    pub fn get_active_session(&self, profile_id: &str) -> Option<SessionInfo> {
        self.multiplexer.active_session(profile_id)
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.multiplexer.list()
    }

    pub fn messages_since(
        &self,
        session_id: &str,
        after_seq: Option<u64>,
    ) -> Result<Vec<SessionMessage>, TerminalError> {
        self.multiplexer.messages_since(session_id, after_seq)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.multiplexer.subscribe()
    }

    /// Close every session; call before process exit
    pub async fn shutdown(&self) {
        self.multiplexer.close_all().await;
    }
}

/// Telnet servers expect CR LF; everything else gets a bare LF
fn line_terminator(kind: TransportKind) -> &'static str {
    match kind {
        TransportKind::Telnet => "\r\n",
        _ => "\n",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ConnectionStatus, RawParams, StaticUpstreamSource, TransportParams};
    use crate::session::MessageKind;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn service() -> TerminalService {
        TerminalService::new(Arc::new(ConnectionRegistry::in_memory()), Settings::default())
    }

    #[tokio::test]
    async fn test_create_and_save_profile() {
        let service = service();
        let draft = service.create_profile("ssh").unwrap();
        assert!(draft.id.is_empty());

        let saved = service.save_profile(draft.clone()).await.unwrap();
        assert!(!saved.id.is_empty());

        let mut renamed = saved.clone();
        renamed.name = "Build box".to_string();
        let updated = service.save_profile(renamed).await.unwrap();
        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.name, "Build box");
        assert_eq!(service.list_profiles().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_names_get_suffix() {
        let service = service();
        let first = service
            .save_profile(service.create_profile("raw").unwrap())
            .await
            .unwrap();
        let second = service
            .save_profile(service.create_profile("raw").unwrap())
            .await
            .unwrap();
        assert_eq!(second.name, format!("{} (1)", first.name));
    }

    #[tokio::test]
    async fn test_unknown_kind_tag() {
        let service = service();
        assert!(matches!(
            service.create_profile("gopher"),
            Err(TerminalError::UnsupportedKind(_))
        ));
    }

    #[tokio::test]
    async fn test_kind_change_rejected() {
        let service = service();
        let saved = service
            .save_profile(service.create_profile("telnet").unwrap())
            .await
            .unwrap();

        let mut retyped = service.create_profile("raw").unwrap();
        retyped.id = saved.id.clone();
        assert!(matches!(
            service.save_profile(retyped).await,
            Err(TerminalError::KindChanged)
        ));
    }

    #[tokio::test]
    async fn test_send_line_appends_terminator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while !received.ends_with(b"two\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });

        let service = service();
        let mut profile = service.create_profile("raw").unwrap();
        profile.params = TransportParams::Raw(RawParams {
            host: "127.0.0.1".to_string(),
            port,
        });
        let profile = service.save_profile(profile).await.unwrap();

        let session = service.open_session(&profile.id).await.unwrap();
        service.send_line(&session.id, "one").await.unwrap();
        service.send_line(&session.id, "two\n").await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"one\ntwo\n");

        let sent: Vec<String> = service
            .messages_since(&session.id, None)
            .unwrap()
            .into_iter()
            .filter(|m| m.kind == MessageKind::Sent)
            .map(|m| m.content)
            .collect();
        assert_eq!(sent, vec!["one\n", "two\n"]);

        service.shutdown().await;
        assert!(service.get_active_session(&profile.id).is_none());
    }

    #[tokio::test]
    async fn test_delete_profile_closes_session() {
        let service = service();
        let mut profile = service.create_profile("monitor").unwrap();
        if let TransportParams::Monitor(params) = &mut profile.params {
            params.upstream_id = "u1".to_string();
        }
        let profile = service.save_profile(profile).await.unwrap();

        let session = service.open_session(&profile.id).await.unwrap();
        assert!(service.get_active_session(&profile.id).is_some());

        assert!(service.delete_profile(&profile.id).await.unwrap());
        assert!(service.list_profiles().await.is_empty());
        let listed = service.list_sessions();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.id);
        assert!(!listed[0].connected);
    }

    #[tokio::test]
    async fn test_failed_open_records_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let service = service();
        let mut profile = service.create_profile("raw").unwrap();
        profile.params = TransportParams::Raw(RawParams {
            host: "127.0.0.1".to_string(),
            port,
        });
        let profile = service.save_profile(profile).await.unwrap();

        let err = service.open_session(&profile.id).await.unwrap_err();
        assert!(matches!(err, TerminalError::ConnectionFailed(_)));

        let stored = service.get_profile(&profile.id).await.unwrap();
        assert_eq!(stored.status, ConnectionStatus::ConnectionFailed);
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn test_monitor_sources() {
        let upstreams = Arc::new(StaticUpstreamSource::new(vec![
            UpstreamInfo {
                id: "a".to_string(),
                name: "Plant A".to_string(),
                provider_label: "Cloud".to_string(),
                description: String::new(),
                connected: true,
            },
            UpstreamInfo {
                id: "b".to_string(),
                name: "Plant B".to_string(),
                provider_label: "Cloud".to_string(),
                description: String::new(),
                connected: false,
            },
        ]));

        let temp = tempdir().unwrap();
        let storage = ProfileStorage::with_path(temp.path().join("terminal_profiles.json"));
        let service =
            TerminalService::bootstrap_with(storage, Settings::default(), Some(upstreams)).await;

        let sources = service.list_monitor_sources().await;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "a");
    }

    #[tokio::test]
    async fn test_profiles_survive_restart() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("terminal_profiles.json");

        let service = TerminalService::bootstrap_with(
            ProfileStorage::with_path(path.clone()),
            Settings::default(),
            None,
        )
        .await;
        let saved = service
            .save_profile(service.create_profile("serial").unwrap())
            .await
            .unwrap();

        let reloaded = TerminalService::bootstrap_with(
            ProfileStorage::with_path(path),
            Settings::default(),
            None,
        )
        .await;
        let profiles = reloaded.list_profiles().await;
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, saved.id);
        assert_eq!(profiles[0].params, saved.params);
        assert_eq!(profiles[0].status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_transport_kinds() {
        let kinds = service().list_transport_kinds();
        assert_eq!(kinds.len(), 6);
        assert!(kinds
            .iter()
            .any(|k| k.kind == TransportKind::Monitor && k.read_only));
    }
}

//! Session Multiplexer
//!
//! Opens sessions from saved profiles and owns them until they are closed.
//!
//! Each session runs one supervisor task that waits on the transport's
//! reader tasks. Whichever side stops a session first (an explicit
//! [`SessionMultiplexer::close`] or a reader reaching end of stream) clears
//! the session's `connected` flag and performs the teardown:
//!
//! 1. cancel the session token and join every reader
//! 2. tear down the transport
//! 3. append the "Disconnected" system message
//! 4. reset the profile status and emit [`SessionEvent::Disconnected`]
//!
//! Closed sessions stay addressable (their log can still be read and a
//! send reports `NotConnected`) until [`SessionMultiplexer::dismiss`].

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::entry::Session;
use super::message_log::MessageLog;
use super::reconnect::ProfileReconnector;
use super::types::{DisconnectReason, MessageKind, SessionEvent, SessionInfo, SessionMessage};
use crate::config::Settings;
use crate::error::TerminalError;
use crate::profile::{ConnectionProfile, ConnectionRegistry, ConnectionStatus, TransportParams};
use crate::transport::{self, ConnectContext, ReadOutcome, TransportError};

/// Event channel capacity; slow subscribers lag rather than block readers
const EVENT_CHANNEL_CAPACITY: usize = 1024;

type OpenFuture = Pin<Box<dyn Future<Output = Result<SessionInfo, TerminalError>> + Send>>;

/// Warning appended for input on a read-only session
const READ_ONLY_WARNING: &str = "Monitor sessions are read-only; input was not sent";

struct Inner {
    registry: Arc<ConnectionRegistry>,
    settings: Settings,
    /// Every session not yet dismissed, open or closed
    sessions: DashMap<String, Arc<Session>>,
    /// profile id -> id of its open session
    by_profile: DashMap<String, String>,
    /// Profiles with an `open` in flight; cancelled when the profile is removed
    opening: Mutex<HashMap<String, CancellationToken>>,
    /// Pending auto-reconnect loops by profile id
    reconnects: DashMap<String, Arc<ProfileReconnector>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Cheap to clone; all clones share the same sessions
#[derive(Clone)]
pub struct SessionMultiplexer {
    inner: Arc<Inner>,
}

/// Releases the in-flight `open` reservation for a profile
struct OpenReservation<'a> {
    opening: &'a Mutex<HashMap<String, CancellationToken>>,
    profile_id: String,
    /// Cancelled by `remove_profile`
    abandoned: CancellationToken,
}

impl Drop for OpenReservation<'_> {
    fn drop(&mut self) {
        self.opening.lock().remove(&self.profile_id);
    }
}

impl SessionMultiplexer {
    pub fn new(registry: Arc<ConnectionRegistry>, settings: Settings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry,
                settings: settings.normalized(),
                sessions: DashMap::new(),
                by_profile: DashMap::new(),
                opening: Mutex::new(HashMap::new()),
                reconnects: DashMap::new(),
                events,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Open a session for `profile_id`
    ///
    /// Cancels a pending auto-reconnect for the profile first.
    pub async fn open(&self, profile_id: &str) -> Result<SessionInfo, TerminalError> {
        self.cancel_reconnect(profile_id);
        self.open_session(profile_id).await
    }

    async fn open_session(&self, profile_id: &str) -> Result<SessionInfo, TerminalError> {
        let profile = self
            .inner
            .registry
            .get(profile_id)
            .await
            .ok_or_else(|| TerminalError::ProfileNotFound(profile_id.to_string()))?;

        profile.params.validate()?;

        let reservation = self.reserve(profile_id)?;

        let registry = &self.inner.registry;
        registry
            .set_status(profile_id, ConnectionStatus::Connecting, None)
            .await;

        let session_id = uuid::Uuid::new_v4().to_string();
        let log = Arc::new(MessageLog::with_capacity(
            session_id.clone(),
            self.inner.settings.max_log_messages,
            Some(self.inner.events.clone()),
        ));
        let token = CancellationToken::new();

        let mut ctx = ConnectContext::new(log.clone(), token.clone())
            .with_geometry(profile.terminal_width, profile.terminal_height)
            .with_read_buffer(self.inner.settings.read_buffer_size);
        if let Some(upstreams) = registry.upstreams() {
            ctx = ctx.with_upstreams(upstreams.clone());
        }

        let timeout_secs = self.connect_timeout_secs(&profile);
        info!(
            "Opening {} session {} for profile {} ({})",
            profile.kind(),
            session_id,
            profile.name,
            profile.params.endpoint()
        );

        let attempt = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            transport::connect(&profile.params, &ctx),
        );
        let result = tokio::select! {
            _ = reservation.abandoned.cancelled() => {
                token.cancel();
                info!("Profile {} removed while opening; abandoning connect", profile_id);
                return Err(TerminalError::ProfileNotFound(profile_id.to_string()));
            }
            result = attempt => match result {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout_secs)),
            },
        };

        let connected = match result {
            Ok(connected) => connected,
            Err(e) => {
                token.cancel();
                let message = e.to_string();
                warn!("Failed to open profile {}: {}", profile_id, message);
                registry
                    .set_status(
                        profile_id,
                        ConnectionStatus::ConnectionFailed,
                        Some(message.clone()),
                    )
                    .await;
                return Err(TerminalError::ConnectionFailed(message));
            }
        };

        let transport::Connected {
            handle,
            readers,
            notices,
        } = connected;

        let session = Arc::new(Session::new(session_id.clone(), &profile, log, token, handle));
        session.log.append(
            MessageKind::System,
            format!("Connected to {}", session.endpoint),
        );
        for (kind, text) in notices {
            session.log.append(kind, text);
        }

        registry.mark_connected(profile_id, Utc::now()).await;

        let supervisor = tokio::spawn(self.clone().supervise(session.clone(), readers));
        session.set_supervisor(supervisor);

        self.inner.sessions.insert(session_id.clone(), session.clone());
        self.inner
            .by_profile
            .insert(profile_id.to_string(), session_id.clone());
        // The stream may already have ended while we were registering
        if !session.is_connected() {
            self.inner
                .by_profile
                .remove_if(profile_id, |_, sid| sid == &session_id);
        }

        // remove_profile ran after connect finished but before registration
        if reservation.abandoned.is_cancelled() {
            info!(
                "Profile {} removed while opening; closing session {}",
                profile_id, session_id
            );
            self.close(&session_id).await?;
            return Err(TerminalError::ProfileNotFound(profile_id.to_string()));
        }

        let _ = self.inner.events.send(SessionEvent::Connected {
            session_id: session_id.clone(),
            profile_id: profile_id.to_string(),
        });

        info!("Session {} connected", session_id);
        Ok(session.info())
    }

    /// `open_session` behind a nameable future type for the reconnect task
    fn open_boxed(&self, profile_id: String) -> OpenFuture {
        let mux = self.clone();
        Box::pin(async move { mux.open_session(&profile_id).await })
    }

    fn connect_timeout_secs(&self, profile: &ConnectionProfile) -> u64 {
        let base = self.inner.settings.connect_timeout_secs;
        match &profile.params {
            TransportParams::Ssh(p) => p.connect_timeout_secs.max(1),
            // The login sequence sleeps twice inside connect
            TransportParams::Telnet(p) => {
                base.saturating_add(p.login_delay_ms.saturating_mul(2).div_ceil(1000))
            }
            _ => base,
        }
    }

    fn reserve(&self, profile_id: &str) -> Result<OpenReservation<'_>, TerminalError> {
        let mut opening = self.inner.opening.lock();
        if opening.contains_key(profile_id) || self.active_session_id(profile_id).is_some() {
            return Err(TerminalError::AlreadyConnected(profile_id.to_string()));
        }
        let abandoned = CancellationToken::new();
        opening.insert(profile_id.to_string(), abandoned.clone());
        Ok(OpenReservation {
            opening: &self.inner.opening,
            profile_id: profile_id.to_string(),
            abandoned,
        })
    }

    /// Write `data` to the session's transport
    pub async fn send(&self, session_id: &str, data: &str) -> Result<(), TerminalError> {
        let session = self.get(session_id)?;

        if !session.is_connected() {
            return Err(TerminalError::NotConnected(session_id.to_string()));
        }

        if session.kind.is_read_only() {
            warn!("Ignoring input for read-only session {}", session_id);
            session.log.append(MessageKind::Warning, READ_ONLY_WARNING);
            return Ok(());
        }

        let handle = session
            .transport()
            .ok_or_else(|| TerminalError::NotConnected(session_id.to_string()))?;

        match handle.write(data.as_bytes()).await {
            Ok(()) => {
                debug!("Sent {} bytes to session {}", data.len(), session_id);
                session.log.append(MessageKind::Sent, data);
                Ok(())
            }
            Err(e) => {
                error!("Send to session {} failed: {}", session_id, e);
                session
                    .log
                    .append(MessageKind::Error, format!("Send failed: {}", e));
                Err(TerminalError::SendFailed(e.to_string()))
            }
        }
    }

    /// Forward a window change; only ssh sessions act on it
    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), TerminalError> {
        let session = self.get(session_id)?;
        let handle = session
            .transport()
            .filter(|_| session.is_connected())
            .ok_or_else(|| TerminalError::NotConnected(session_id.to_string()))?;

        handle
            .resize(cols, rows)
            .await
            .map_err(|e| TerminalError::SendFailed(e.to_string()))
    }

    /// Close a session. Closing an already closed session is a no-op.
    pub async fn close(&self, session_id: &str) -> Result<(), TerminalError> {
        let session = self.get(session_id)?;

        if !session.mark_disconnected() {
            debug!("Session {} already closed", session_id);
            return Ok(());
        }

        info!("Closing session {}", session_id);
        self.cancel_reconnect(&session.profile_id);

        session.token().cancel();
        if let Some(supervisor) = session.take_supervisor() {
            if let Err(e) = supervisor.await {
                warn!("Supervisor for session {} ended abnormally: {}", session_id, e);
            }
        }

        self.finish(&session, DisconnectReason::Closed).await;
        Ok(())
    }

    /// Close (if needed) and forget a session
    pub async fn dismiss(&self, session_id: &str) -> Result<(), TerminalError> {
        self.close(session_id).await?;
        self.inner.sessions.remove(session_id);
        Ok(())
    }

    /// Close every session and stop pending reconnects
    pub async fn close_all(&self) {
        for entry in self.inner.reconnects.iter() {
            entry.value().cancel();
        }
        self.inner.reconnects.clear();

        let ids: Vec<String> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect();

        info!("Closing {} open sessions", ids.len());
        for id in ids {
            if let Err(e) = self.close(&id).await {
                warn!("Failed to close session {}: {}", id, e);
            }
        }
    }

    /// Close the profile's open session, then delete the profile.
    /// An `open` still in flight for the profile is abandoned.
    pub async fn remove_profile(&self, profile_id: &str) -> Result<bool, TerminalError> {
        self.cancel_reconnect(profile_id);

        let in_flight = self.inner.opening.lock().get(profile_id).cloned();
        if let Some(abandoned) = in_flight {
            abandoned.cancel();
        }

        if let Some(session_id) = self.active_session_id(profile_id) {
            self.close(&session_id).await?;
        }

        Ok(self.inner.registry.remove(profile_id).await)
    }

    fn get(&self, session_id: &str) -> Result<Arc<Session>, TerminalError> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TerminalError::SessionNotFound(session_id.to_string()))
    }

    fn active_session_id(&self, profile_id: &str) -> Option<String> {
        let session_id = self.inner.by_profile.get(profile_id)?.value().clone();
        self.inner
            .sessions
            .get(&session_id)
            .filter(|entry| entry.value().is_connected())
            .map(|_| session_id)
    }

    /// The open session of a profile
    pub fn active_session(&self, profile_id: &str) -> Option<SessionInfo> {
        let session_id = self.active_session_id(profile_id)?;
        self.session(&session_id)
    }

    pub fn session(&self, session_id: &str) -> Option<SessionInfo> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| entry.value().info())
    }

    /// All sessions, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().info())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Messages appended after `after_seq` (everything for `None`)
    pub fn messages_since(
        &self,
        session_id: &str,
        after_seq: Option<u64>,
    ) -> Result<Vec<SessionMessage>, TerminalError> {
        Ok(self.get(session_id)?.log.since(after_seq))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Number of sessions still connected
    pub fn connected_count(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|entry| entry.value().is_connected())
            .count()
    }

    /// Wait for the first reader to stop, then make sure all of them stop.
    /// Performs the teardown itself when the stream ended on its own.
    async fn supervise(self, session: Arc<Session>, mut readers: JoinSet<ReadOutcome>) {
        let reason = match readers.join_next().await {
            Some(Ok(ReadOutcome::Cancelled)) | None => DisconnectReason::Closed,
            Some(Ok(ReadOutcome::Eof)) => DisconnectReason::EndOfStream,
            Some(Ok(ReadOutcome::Failed(message))) => DisconnectReason::Error(message),
            Some(Err(e)) => DisconnectReason::Error(format!("reader task failed: {}", e)),
        };

        session.token().cancel();
        while readers.join_next().await.is_some() {}

        if matches!(reason, DisconnectReason::Closed) {
            return;
        }

        // close() got there first and owns the teardown
        if !session.mark_disconnected() {
            return;
        }

        match &reason {
            DisconnectReason::Error(message) => {
                error!("Session {} read failed: {}", session.id, message);
                session
                    .log
                    .append(MessageKind::Error, format!("Read error: {}", message));
            }
            _ => info!("Session {} ended by remote", session.id),
        }

        // Drop the join handle to ourselves; nobody will await it now
        drop(session.take_supervisor());

        self.finish(&session, reason.clone()).await;

        if reason.is_unexpected() {
            self.maybe_reconnect(&session.profile_id).await;
        }
    }

    /// Teardown shared by `close` and the supervisor. Readers are joined.
    async fn finish(&self, session: &Session, reason: DisconnectReason) {
        if let Some(handle) = session.take_transport() {
            handle.teardown().await;
        }

        session.log.append(MessageKind::System, "Disconnected");

        self.inner
            .by_profile
            .remove_if(&session.profile_id, |_, sid| sid == &session.id);

        let last_error = match &reason {
            DisconnectReason::Error(message) => Some(message.clone()),
            _ => None,
        };
        self.inner
            .registry
            .set_status(&session.profile_id, ConnectionStatus::Disconnected, last_error)
            .await;

        let _ = self.inner.events.send(SessionEvent::Disconnected {
            session_id: session.id.clone(),
            profile_id: session.profile_id.clone(),
            reason,
        });

        info!("Session {} disconnected", session.id);
    }

    async fn maybe_reconnect(&self, profile_id: &str) {
        let config = &self.inner.settings.reconnect;
        if !config.enabled {
            return;
        }

        match self.inner.registry.get(profile_id).await {
            Some(profile) if profile.auto_reconnect => {}
            _ => return,
        }

        let reconnector = Arc::new(
            ProfileReconnector::new(profile_id, config.clone())
                .with_events(self.inner.events.clone()),
        );
        if let Some(previous) = self
            .inner
            .reconnects
            .insert(profile_id.to_string(), reconnector.clone())
        {
            previous.cancel();
        }

        info!("Scheduling auto-reconnect for profile {}", profile_id);

        let mux = self.clone();
        let profile_id = profile_id.to_string();
        tokio::spawn(async move {
            let result = reconnector
                .run(|| {
                    let attempt = mux.open_boxed(profile_id.clone());
                    async move { attempt.await.map(|_| ()).map_err(|e| e.to_string()) }
                })
                .await;

            if let Err(e) = result {
                debug!("Auto-reconnect for profile {} stopped: {}", profile_id, e);
            }
            mux.inner
                .reconnects
                .remove_if(&profile_id, |_, r| Arc::ptr_eq(r, &reconnector));
        });
    }

    fn cancel_reconnect(&self, profile_id: &str) {
        if let Some((_, reconnector)) = self.inner.reconnects.remove(profile_id) {
            reconnector.cancel();
        }
    }
}

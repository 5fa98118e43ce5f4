//! A live session
//!
//! Owned by the multiplexer; callers only ever see [`SessionInfo`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::message_log::MessageLog;
use super::types::SessionInfo;
use crate::profile::{ConnectionProfile, TransportKind};
use crate::transport::TransportHandle;

pub struct Session {
    pub id: String,
    pub profile_id: String,
    pub profile_name: String,
    pub kind: TransportKind,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
    pub log: Arc<MessageLog>,
    /// Cleared exactly once; whoever clears it runs the teardown
    connected: AtomicBool,
    token: CancellationToken,
    transport: Mutex<Option<Arc<TransportHandle>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        id: String,
        profile: &ConnectionProfile,
        log: Arc<MessageLog>,
        token: CancellationToken,
        transport: TransportHandle,
    ) -> Self {
        Self {
            id,
            profile_id: profile.id.clone(),
            profile_name: profile.name.clone(),
            kind: profile.kind(),
            endpoint: profile.params.endpoint(),
            created_at: Utc::now(),
            log,
            connected: AtomicBool::new(true),
            token,
            transport: Mutex::new(Some(Arc::new(transport))),
            supervisor: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Flip to disconnected; true only for the caller that did the flip
    pub fn mark_disconnected(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Transport for a write; None once torn down
    pub fn transport(&self) -> Option<Arc<TransportHandle>> {
        self.transport.lock().clone()
    }

    pub fn take_transport(&self) -> Option<Arc<TransportHandle>> {
        self.transport.lock().take()
    }

    pub fn set_supervisor(&self, handle: JoinHandle<()>) {
        *self.supervisor.lock() = Some(handle);
    }

    pub fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.supervisor.lock().take()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            profile_id: self.profile_id.clone(),
            profile_name: self.profile_name.clone(),
            kind: self.kind,
            endpoint: self.endpoint.clone(),
            created_at: self.created_at,
            connected: self.is_connected(),
            message_count: self.log.len(),
            last_seq: self.log.last_seq(),
        }
    }
}

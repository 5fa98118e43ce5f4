//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PrivateKey, PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::error::SshError;
use crate::config::expand_home;
use crate::profile::{SshAuth, SshParams};

/// Connects and authenticates against one SSH server
pub struct SshClient {
    params: SshParams,
    timeout_secs: u64,
}

impl SshClient {
    pub fn new(params: SshParams) -> Self {
        let timeout_secs = params.connect_timeout_secs.max(1);
        Self {
            params,
            timeout_secs,
        }
    }

    /// Connect to the SSH server and return an authenticated handle
    pub async fn connect(self) -> Result<Handle<ClientHandler>, SshError> {
        let addr = format!("{}:{}", self.params.host, self.params.port);

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(self.params.host.clone(), self.params.port);

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout("Connection timed out".to_string()))?
        .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        debug!("SSH handshake completed");

        let authenticated = match &self.params.auth {
            SshAuth::Password { password } => handle
                .authenticate_password(&self.params.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            SshAuth::Key {
                key_path,
                key_content,
                passphrase,
            } => {
                let key = load_private_key(key_path, key_content, passphrase.as_deref())?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.params.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}", addr);

        Ok(handle)
    }
}

/// Load a private key from inline content or from a file.
/// Inline content wins when both are set.
pub fn load_private_key(
    key_path: &str,
    key_content: &str,
    passphrase: Option<&str>,
) -> Result<PrivateKey, SshError> {
    let passphrase = passphrase.filter(|p| !p.is_empty());

    if !key_content.trim().is_empty() {
        return russh::keys::decode_secret_key(key_content, passphrase)
            .map_err(|e| SshError::KeyError(format!("Failed to decode key: {}", e)));
    }

    if key_path.trim().is_empty() {
        return Err(SshError::KeyError("No private key configured".to_string()));
    }

    let path = expand_home(key_path.trim());
    russh::keys::load_secret_key(&path, passphrase).map_err(|e| {
        SshError::KeyError(format!("Failed to load key {}: {}", path.display(), e))
    })
}

/// SHA256 fingerprint in OpenSSH notation
pub fn host_key_fingerprint(key: &PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// Client handler for russh callbacks
///
/// Host keys are accepted; the fingerprint is logged so a changed key is
/// visible in the log.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Accepting host key for {}:{} (fingerprint: {})",
            self.host,
            self.port,
            host_key_fingerprint(server_public_key)
        );
        Ok(true)
    }
}

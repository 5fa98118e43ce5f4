//! Auto-reconnect
//!
//! When a session of a profile with `auto_reconnect` ends unexpectedly the
//! multiplexer hands the profile to a [`ProfileReconnector`], which retries
//! `open` with exponential backoff until it succeeds, gives up, or is
//! cancelled (profile removed, session opened by hand, shutdown).

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::types::SessionEvent;

/// Reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts
    pub max_attempts: u32,
    /// Delay before the first attempt (ms)
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts (ms)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Global switch; profiles opt in individually
    pub enabled: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 1.5,
            enabled: true,
        }
    }
}

impl ReconnectConfig {
    /// Delay before `attempt` (1-based) using exponential backoff
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let delay = base_delay * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        delay.min(self.max_delay_ms as f64) as u64
    }
}

/// Errors during reconnection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    #[error("Reconnection is disabled")]
    Disabled,

    #[error("Reconnection was cancelled")]
    Cancelled,

    #[error("Maximum reconnection attempts ({0}) reached")]
    MaxAttemptsReached(u32),
}

/// Reconnection driver for a single profile
pub struct ProfileReconnector {
    profile_id: String,
    config: ReconnectConfig,
    attempt_count: AtomicU32,
    cancel: CancellationToken,
    events: Option<broadcast::Sender<SessionEvent>>,
}

impl ProfileReconnector {
    pub fn new(profile_id: impl Into<String>, config: ReconnectConfig) -> Self {
        Self {
            profile_id: profile_id.into(),
            config,
            attempt_count: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cancel(&self) {
        info!("Cancelling reconnection for profile {}", self.profile_id);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Retry `connect_fn` with backoff
    ///
    /// Every attempt, including the first, waits its backoff delay first so
    /// a remote that just dropped us is not hammered.
    pub async fn run<F, Fut>(&self, mut connect_fn: F) -> Result<(), ReconnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        if !self.config.enabled || self.config.max_attempts == 0 {
            return Err(ReconnectError::Disabled);
        }

        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            let delay_ms = self.config.delay_for(attempt);
            self.emit(SessionEvent::Reconnecting {
                profile_id: self.profile_id.clone(),
                attempt,
                max_attempts,
                delay_ms,
            });

            info!(
                "Profile {}: waiting {}ms before reconnect attempt {}/{}",
                self.profile_id, delay_ms, attempt, max_attempts
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ReconnectError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }

            self.attempt_count.store(attempt, Ordering::SeqCst);

            match connect_fn().await {
                Ok(()) => {
                    info!(
                        "Profile {}: reconnected on attempt {}",
                        self.profile_id, attempt
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Profile {}: reconnect attempt {} failed: {}",
                        self.profile_id, attempt, e
                    );
                }
            }

            if self.is_cancelled() {
                return Err(ReconnectError::Cancelled);
            }
        }

        error!(
            "Profile {}: reconnection failed after {} attempts",
            self.profile_id, max_attempts
        );
        self.emit(SessionEvent::ReconnectFailed {
            profile_id: self.profile_id.clone(),
            attempts: max_attempts,
        });

        Err(ReconnectError::MaxAttemptsReached(max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast() -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            enabled: true,
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 1000);
        assert!(config.enabled);
    }

    #[test]
    fn test_delay_for() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for(1), 1000);
        assert_eq!(config.delay_for(2), 1500);
        assert_eq!(config.delay_for(3), 2250);
        assert_eq!(config.delay_for(20), 10_000);
    }

    #[tokio::test]
    async fn test_succeeds_on_later_attempt() {
        let reconnector = ProfileReconnector::new("p", fast());
        let calls = Arc::new(AtomicU32::new(0));

        let result = reconnector
            .run(|| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("refused".to_string())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(reconnector.attempt_count(), 2);
    }

    #[tokio::test]
    async fn test_gives_up() {
        let (tx, mut rx) = broadcast::channel(16);
        let reconnector = ProfileReconnector::new("p", fast()).with_events(tx);

        let result = reconnector.run(|| async { Err("down".to_string()) }).await;
        assert_eq!(result, Err(ReconnectError::MaxAttemptsReached(3)));

        let mut reconnecting = 0;
        let mut failed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SessionEvent::Reconnecting { .. } => reconnecting += 1,
                SessionEvent::ReconnectFailed { attempts, .. } => {
                    failed = true;
                    assert_eq!(attempts, 3);
                }
                _ => {}
            }
        }
        assert_eq!(reconnecting, 3);
        assert!(failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_attempt() {
        let reconnector = ProfileReconnector::new("p", ReconnectConfig::default());
        reconnector.cancel();

        let result = reconnector.run(|| async { Ok(()) }).await;
        assert_eq!(result, Err(ReconnectError::Cancelled));
        assert_eq!(reconnector.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled() {
        let config = ReconnectConfig {
            enabled: false,
            ..fast()
        };
        let reconnector = ProfileReconnector::new("p", config);
        assert_eq!(
            reconnector.run(|| async { Ok(()) }).await,
            Err(ReconnectError::Disabled)
        );
    }
}

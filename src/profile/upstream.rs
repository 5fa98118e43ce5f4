//! Upstream data sources a monitor profile can observe
//!
//! The store behind this lives outside the crate; only the listing
//! contract is consumed here.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamInfo {
    pub id: String,
    pub name: String,
    pub provider_label: String,
    #[serde(default)]
    pub description: String,
    /// Only connected upstreams are offered to monitor profiles
    #[serde(default)]
    pub connected: bool,
}

/// Source of connectable upstream resources
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Every upstream the source knows about, in any state
    async fn list_upstreams(&self) -> Vec<UpstreamInfo>;

    /// Upstreams currently in a connected state
    async fn list_connectable_upstreams(&self) -> Vec<UpstreamInfo> {
        self.list_upstreams()
            .await
            .into_iter()
            .filter(|u| u.connected)
            .collect()
    }
}

/// In-memory upstream list
#[derive(Default)]
pub struct StaticUpstreamSource {
    upstreams: RwLock<Vec<UpstreamInfo>>,
}

impl StaticUpstreamSource {
    pub fn new(upstreams: Vec<UpstreamInfo>) -> Self {
        Self {
            upstreams: RwLock::new(upstreams),
        }
    }

    /// Replace the whole list
    pub fn set(&self, upstreams: Vec<UpstreamInfo>) {
        *self.upstreams.write() = upstreams;
    }
}

#[async_trait]
impl UpstreamSource for StaticUpstreamSource {
    async fn list_upstreams(&self) -> Vec<UpstreamInfo> {
        self.upstreams.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(id: &str, connected: bool) -> UpstreamInfo {
        UpstreamInfo {
            id: id.to_string(),
            name: format!("bucket {}", id),
            provider_label: "S3".to_string(),
            description: String::new(),
            connected,
        }
    }

    #[tokio::test]
    async fn test_only_connected_are_connectable() {
        let source = StaticUpstreamSource::new(vec![upstream("a", true), upstream("b", false)]);
        let connectable = source.list_connectable_upstreams().await;
        assert_eq!(connectable.len(), 1);
        assert_eq!(connectable[0].id, "a");

        source.set(vec![upstream("c", true)]);
        assert_eq!(source.list_upstreams().await[0].id, "c");
    }
}

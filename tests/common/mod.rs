//! Common test utilities for reload integration tests
//!
//! Provides an in-memory cluster, a refresh callback that records what it
//! was handed, and a reload configuration tuned for fast tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use config_reload_controller::cluster::memory::InMemoryCluster;
use config_reload_controller::config::ReloadConfig;
use config_reload_controller::error::Result;
use config_reload_controller::resolver::{ResolverOptions, SourceResolver};
use config_reload_controller::snapshot::EffectiveSnapshot;
use config_reload_controller::trigger::RefreshCallback;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "spring-k8s";

/// Refresh callback that keeps every snapshot it receives
#[derive(Debug, Default)]
pub struct RecordingRefresh {
    snapshots: Mutex<Vec<EffectiveSnapshot>>,
}

impl RecordingRefresh {
    pub fn calls(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<EffectiveSnapshot> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl RefreshCallback for RecordingRefresh {
    async fn refresh(&self, snapshot: &EffectiveSnapshot) -> Result<()> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Event-mode config with a short debounce and fast watch backoff
pub fn fast_config() -> ReloadConfig {
    ReloadConfig {
        namespace: NAMESPACE.to_string(),
        debounce: Duration::from_millis(50),
        watch_backoff_start_ms: 10,
        watch_backoff_max_ms: 50,
        refresh_timeout: Duration::from_secs(2),
        ..ReloadConfig::default()
    }
}

pub fn resolver(
    cluster: &Arc<InMemoryCluster>,
    options: ResolverOptions,
) -> SourceResolver<InMemoryCluster> {
    SourceResolver::new(Arc::clone(cluster), options)
}

/// Poll `condition` every 10ms until it holds or five seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

//! # Cluster Access
//!
//! Capability interface over the Kubernetes API for ConfigMaps and Secrets.
//!
//! Implementations:
//! - [`kubernetes::KubeCluster`] talks to a real API server
//! - [`memory::InMemoryCluster`] keeps objects in memory and emits watch events

use crate::error::{Result, TransportError};
use crate::source::{RawSource, SourceKey, SourceKind};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;

pub mod kubernetes;
pub mod memory;

/// Change observed on a watched kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// Object created or updated (also emitted for every object on (re)subscription)
    Applied(RawSource),
    /// Object removed
    Deleted(SourceKey),
}

/// Stream of watch events for one kind in one namespace
pub type WatchStream = BoxStream<'static, std::result::Result<ClusterEvent, TransportError>>;

/// Read and watch access to ConfigMaps and Secrets
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a single object by name. `Ok(None)` when it does not exist.
    async fn get(&self, kind: SourceKind, namespace: &str, name: &str)
        -> Result<Option<RawSource>>;

    /// List every object in `namespace` carrying all of `labels`
    async fn list(
        &self,
        kind: SourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<RawSource>>;

    /// Subscribe to changes of `kind` in `namespace`.
    /// The stream ends or yields an error when the transport drops.
    async fn watch(&self, kind: SourceKind, namespace: &str) -> Result<WatchStream>;
}

//! # In-Memory Cluster
//!
//! [`ClusterApi`] over an in-process object store. Every mutation bumps a
//! cluster-wide resource version and is broadcast to open watch streams.
//! Watch transports can be dropped on demand to exercise resubscription.

use super::{ClusterApi, ClusterEvent, WatchStream};
use crate::error::{ReloadError, Result, TransportError};
use crate::source::{RawSource, SourceKey, SourceKind};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum Signal {
    Event(ClusterEvent),
    Disconnect,
}

/// In-memory ConfigMap/Secret store with a watch feed
#[derive(Debug)]
pub struct InMemoryCluster {
    objects: Mutex<BTreeMap<SourceKey, RawSource>>,
    version: AtomicU64,
    subscriptions: AtomicUsize,
    feed: broadcast::Sender<Signal>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            objects: Mutex::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            subscriptions: AtomicUsize::new(0),
            feed,
        }
    }

    /// Create or replace an object. `resource_version` is assigned by the store.
    /// Returns the new resource version.
    pub fn apply(&self, mut raw: RawSource) -> String {
        let version = (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        raw.resource_version = version.clone();
        self.lock().insert(raw.key.clone(), raw.clone());
        let _ = self.feed.send(Signal::Event(ClusterEvent::Applied(raw)));
        version
    }

    /// Create or replace a ConfigMap with plain-text data
    pub fn put_config_map<'a>(
        &self,
        namespace: &str,
        name: &str,
        labels: impl IntoIterator<Item = (&'a str, &'a str)>,
        data: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> String {
        self.apply(RawSource {
            key: SourceKey::new(SourceKind::ConfigMap, namespace, name),
            labels: to_map(labels),
            data: to_map(data),
            resource_version: String::new(),
        })
    }

    /// Create or replace a Secret; values are given in plain text and stored Base64-encoded
    pub fn put_secret<'a>(
        &self,
        namespace: &str,
        name: &str,
        labels: impl IntoIterator<Item = (&'a str, &'a str)>,
        data: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> String {
        let data = data
            .into_iter()
            .map(|(k, v)| (k.to_string(), general_purpose::STANDARD.encode(v)))
            .collect();
        self.apply(RawSource {
            key: SourceKey::new(SourceKind::Secret, namespace, name),
            labels: to_map(labels),
            data,
            resource_version: String::new(),
        })
    }

    /// Bump the resource version of an object without touching its data,
    /// like a metadata-only update. Returns `None` when the object is absent.
    pub fn touch(&self, key: &SourceKey) -> Option<String> {
        let current = self.lock().get(key).cloned()?;
        Some(self.apply(current))
    }

    /// Remove an object. Returns true when it existed.
    pub fn delete(&self, key: &SourceKey) -> bool {
        let removed = self.lock().remove(key).is_some();
        if removed {
            let _ = self
                .feed
                .send(Signal::Event(ClusterEvent::Deleted(key.clone())));
        }
        removed
    }

    /// Drop every open watch transport; each stream yields one error and ends
    pub fn disconnect_watches(&self) {
        let _ = self.feed.send(Signal::Disconnect);
    }

    /// Number of `watch` calls served so far
    #[must_use]
    pub fn watch_subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<SourceKey, RawSource>> {
        // A poisoned store only means a test panicked mid-update; keep serving
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn snapshot_of(&self, kind: SourceKind, namespace: &str) -> Vec<RawSource> {
        self.lock()
            .values()
            .filter(|raw| raw.key.kind == kind && raw.key.namespace == namespace)
            .cloned()
            .collect()
    }
}

fn to_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

struct WatchState {
    initial: VecDeque<RawSource>,
    receiver: broadcast::Receiver<Signal>,
    kind: SourceKind,
    namespace: String,
    closed: bool,
}

impl WatchState {
    fn relevant(&self, key: &SourceKey) -> bool {
        key.kind == self.kind && key.namespace == self.namespace
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn get(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RawSource>> {
        Ok(self
            .lock()
            .get(&SourceKey::new(kind, namespace, name))
            .cloned())
    }

    async fn list(
        &self,
        kind: SourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<RawSource>> {
        Ok(self
            .snapshot_of(kind, namespace)
            .into_iter()
            .filter(|raw| labels.iter().all(|(k, v)| raw.labels.get(k) == Some(v)))
            .collect())
    }

    async fn watch(&self, kind: SourceKind, namespace: &str) -> Result<WatchStream> {
        if namespace.is_empty() {
            return Err(ReloadError::Cluster("namespace must not be empty".to_string()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        // Subscribe before listing so no mutation falls between the two
        let receiver = self.feed.subscribe();
        let state = WatchState {
            initial: self.snapshot_of(kind, namespace).into(),
            receiver,
            kind,
            namespace: namespace.to_string(),
            closed: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.closed {
                return None;
            }
            if let Some(raw) = state.initial.pop_front() {
                return Some((Ok(ClusterEvent::Applied(raw)), state));
            }
            loop {
                match state.receiver.recv().await {
                    Ok(Signal::Event(event)) => {
                        let key = match &event {
                            ClusterEvent::Applied(raw) => &raw.key,
                            ClusterEvent::Deleted(key) => key,
                        };
                        if state.relevant(key) {
                            return Some((Ok(event), state));
                        }
                    }
                    Ok(Signal::Disconnect) => {
                        state.closed = true;
                        let error = TransportError::Disconnected("connection dropped".to_string());
                        return Some((Err(error), state));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        state.closed = true;
                        let error = TransportError::Disconnected(format!(
                            "watch lagged behind by {skipped} events"
                        ));
                        return Some((Err(error), state));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

//! # Watcher
//!
//! Subscribes to change notifications for the objects a set of rules cares
//! about and merges them into one ordered channel.
//!
//! One background task runs per watched (kind, namespace) pair. Each task:
//! - forwards events for keys or labels in its [`WatchInterest`]
//! - drops consecutive events for a key whose resource version is unchanged
//! - resubscribes after any transport failure, with exponential backoff
//!
//! Transport failures never leave this module; they are logged, counted and
//! retried until the watcher is dropped.

use crate::backoff::ExponentialBackoff;
use crate::cluster::{ClusterApi, ClusterEvent};
use crate::constants::{
    DEFAULT_WATCH_BACKOFF_MAX_MS, DEFAULT_WATCH_BACKOFF_START_MS, WATCH_CHANNEL_CAPACITY,
};
use crate::error::TransportError;
use crate::observability::metrics;
use crate::runtime::error_policy::watch_restart_delay;
use crate::source::{SourceKey, SourceKind};
use futures::{Stream, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Change to a watched source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: SourceKey,
    /// New resource version; `None` when the object was deleted
    pub new_version: Option<String>,
}

/// Objects whose changes are forwarded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchInterest {
    keys: BTreeSet<SourceKey>,
    selectors: Vec<(SourceKind, String, BTreeMap<String, String>)>,
}

impl WatchInterest {
    pub fn add_key(&mut self, key: SourceKey) {
        self.keys.insert(key);
    }

    pub fn add_selector(
        &mut self,
        kind: SourceKind,
        namespace: &str,
        labels: BTreeMap<String, String>,
    ) {
        let selector = (kind, namespace.to_string(), labels);
        if !self.selectors.contains(&selector) {
            self.selectors.push(selector);
        }
    }

    /// True when `key` is watched by name, or when `labels` satisfy a
    /// selector for the key's kind and namespace
    #[must_use]
    pub fn matches(&self, key: &SourceKey, labels: Option<&BTreeMap<String, String>>) -> bool {
        if self.keys.contains(key) {
            return true;
        }
        let Some(labels) = labels else {
            return false;
        };
        self.selectors.iter().any(|(kind, namespace, selector)| {
            *kind == key.kind
                && *namespace == key.namespace
                && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
        })
    }

    /// Distinct (kind, namespace) pairs that need a watch stream
    #[must_use]
    pub fn streams(&self) -> BTreeSet<(SourceKind, String)> {
        self.keys
            .iter()
            .map(|key| (key.kind, key.namespace.clone()))
            .chain(
                self.selectors
                    .iter()
                    .map(|(kind, namespace, _)| (*kind, namespace.clone())),
            )
            .collect()
    }

    /// Keep only the kinds that are monitored
    #[must_use]
    pub fn restrict_kinds(mut self, config_maps: bool, secrets: bool) -> Self {
        let keep = |kind: SourceKind| match kind {
            SourceKind::ConfigMap => config_maps,
            SourceKind::Secret => secrets,
        };
        self.keys.retain(|key| keep(key.kind));
        self.selectors.retain(|(kind, _, _)| keep(*kind));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.selectors.is_empty()
    }
}

/// Resubscription tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherOptions {
    pub backoff_start: Duration,
    pub backoff_max: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            backoff_start: Duration::from_millis(DEFAULT_WATCH_BACKOFF_START_MS),
            backoff_max: Duration::from_millis(DEFAULT_WATCH_BACKOFF_MAX_MS),
        }
    }
}

/// Merged, de-duplicated change feed. Dropping it stops every watch task.
#[derive(Debug)]
pub struct Watcher {
    receiver: mpsc::Receiver<ChangeEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Watcher {
    /// Start one watch task per (kind, namespace) in `interest`
    pub fn spawn<C>(cluster: Arc<C>, interest: WatchInterest, options: WatcherOptions) -> Self
    where
        C: ClusterApi + ?Sized + 'static,
    {
        let (sender, receiver) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let interest = Arc::new(interest);
        let tasks = interest
            .streams()
            .into_iter()
            .map(|(kind, namespace)| {
                let span = tracing::span!(
                    tracing::Level::INFO,
                    "watch.subscription",
                    source.kind = kind.as_str(),
                    source.namespace = namespace.as_str()
                );
                tokio::spawn(
                    watch_kind(
                        Arc::clone(&cluster),
                        kind,
                        namespace,
                        Arc::clone(&interest),
                        sender.clone(),
                        options,
                    )
                    .instrument(span),
                )
            })
            .collect();

        Self { receiver, tasks }
    }

    /// Next change; `None` once every watch task has stopped
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Next change if one is already queued
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Consume the watcher as a lazy event sequence
    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> + Send {
        futures::stream::unfold(self, |mut watcher| async move {
            watcher.next().await.map(|event| (event, watcher))
        })
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Tracks the last forwarded version per key and suppresses repeats
#[derive(Debug, Default)]
struct Deduplicator {
    last: HashMap<SourceKey, Option<String>>,
}

impl Deduplicator {
    /// Turn a cluster event into a change, or `None` if irrelevant or repeated
    fn observe(&mut self, event: ClusterEvent, interest: &WatchInterest) -> Option<ChangeEvent> {
        let (key, version, relevant) = match event {
            ClusterEvent::Applied(raw) => {
                let relevant = interest.matches(&raw.key, Some(&raw.labels));
                (raw.key, Some(raw.resource_version), relevant)
            }
            ClusterEvent::Deleted(key) => {
                let relevant = interest.matches(&key, None);
                (key, None, relevant)
            }
        };

        if !relevant {
            // An object that stopped matching (labels removed) is reported once
            return self.last.remove(&key).map(|_| ChangeEvent {
                key,
                new_version: version,
            });
        }

        if self.last.get(&key) == Some(&version) {
            metrics::increment_watch_events_suppressed();
            return None;
        }
        self.last.insert(key.clone(), version.clone());
        Some(ChangeEvent {
            key,
            new_version: version,
        })
    }
}

async fn watch_kind<C>(
    cluster: Arc<C>,
    kind: SourceKind,
    namespace: String,
    interest: Arc<WatchInterest>,
    sender: mpsc::Sender<ChangeEvent>,
    options: WatcherOptions,
) where
    C: ClusterApi + ?Sized,
{
    let mut backoff = ExponentialBackoff::new(options.backoff_start, options.backoff_max);
    let mut dedup = Deduplicator::default();

    loop {
        let failure = match cluster.watch(kind, &namespace).await {
            Ok(mut stream) => {
                info!("watch.subscribed");
                loop {
                    match stream.next().await {
                        Some(Ok(event)) => {
                            backoff.reset();
                            metrics::increment_watch_events(kind.as_str());
                            if let Some(change) = dedup.observe(event, &interest) {
                                debug!(
                                    source.name = change.key.name.as_str(),
                                    resource.version =
                                        change.new_version.as_deref().unwrap_or("deleted"),
                                    "watch.event.received"
                                );
                                if sender.send(change).await.is_err() {
                                    debug!("Change consumer gone, stopping watch");
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => break e,
                        None => {
                            break TransportError::Disconnected("watch stream ended".to_string())
                        }
                    }
                }
            }
            Err(e) => TransportError::Disconnected(e.to_string()),
        };

        if sender.is_closed() {
            return;
        }

        let delay = watch_restart_delay(&failure, &mut backoff);
        metrics::increment_watch_restarts(kind.as_str());
        warn!(
            error = %failure,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = backoff.attempts(),
            "watch.resubscribing"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

//! # Kubernetes Cluster
//!
//! [`ClusterApi`] backed by the Kubernetes API server via `kube`.
//!
//! Secret payloads arrive already decoded by `k8s-openapi`; they are
//! re-encoded to Base64 here so that every [`RawSource`] for a Secret carries
//! the same representation the API server stores.

use super::{ClusterApi, ClusterEvent, WatchStream};
use crate::error::{ReloadError, Result, TransportError};
use crate::source::{RawSource, SourceKey, SourceKind};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams};
use kube::Client;
use kube_runtime::watcher;
use std::collections::BTreeMap;
use tracing::debug;

/// Cluster access through a `kube::Client`
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build from the in-cluster service account or the local kubeconfig
    ///
    /// # Errors
    ///
    /// Returns an error when no usable client configuration is found.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ReloadError::Cluster(format!("failed to create client: {e}")))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RawSource>> {
        debug!(
            source.kind = kind.as_str(),
            source.namespace = namespace,
            source.name = name,
            "cluster.get"
        );
        match kind {
            SourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                let found = api.get_opt(name).await.map_err(cluster_error)?;
                Ok(found.map(|cm| configmap_to_raw(cm, namespace)))
            }
            SourceKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                let found = api.get_opt(name).await.map_err(cluster_error)?;
                Ok(found.map(|secret| secret_to_raw(secret, namespace)))
            }
        }
    }

    async fn list(
        &self,
        kind: SourceKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<RawSource>> {
        let selector = label_selector(labels);
        debug!(
            source.kind = kind.as_str(),
            source.namespace = namespace,
            selector = selector.as_str(),
            "cluster.list"
        );
        let params = ListParams::default().labels(&selector);
        match kind {
            SourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                let list = api.list(&params).await.map_err(cluster_error)?;
                Ok(list
                    .items
                    .into_iter()
                    .map(|cm| configmap_to_raw(cm, namespace))
                    .collect())
            }
            SourceKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                let list = api.list(&params).await.map_err(cluster_error)?;
                Ok(list
                    .items
                    .into_iter()
                    .map(|secret| secret_to_raw(secret, namespace))
                    .collect())
            }
        }
    }

    async fn watch(&self, kind: SourceKind, namespace: &str) -> Result<WatchStream> {
        let ns = namespace.to_string();
        let stream = match kind {
            SourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                watcher(api, watcher::Config::default())
                    .filter_map(move |event| {
                        futures::future::ready(translate_event(event, |cm| {
                            configmap_to_raw(cm, &ns)
                        }))
                    })
                    .boxed()
            }
            SourceKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                watcher(api, watcher::Config::default())
                    .filter_map(move |event| {
                        futures::future::ready(translate_event(event, |secret| {
                            secret_to_raw(secret, &ns)
                        }))
                    })
                    .boxed()
            }
        };
        Ok(stream)
    }
}

/// Map a kube watcher event onto a [`ClusterEvent`]; init markers are dropped
fn translate_event<K>(
    event: std::result::Result<watcher::Event<K>, watcher::Error>,
    to_raw: impl Fn(K) -> RawSource,
) -> Option<std::result::Result<ClusterEvent, TransportError>> {
    match event {
        Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj)) => {
            Some(Ok(ClusterEvent::Applied(to_raw(obj))))
        }
        Ok(watcher::Event::Delete(obj)) => Some(Ok(ClusterEvent::Deleted(to_raw(obj).key))),
        Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
        Err(e) => Some(Err(classify_watch_error(&e.to_string()))),
    }
}

/// Classify a watch failure by its message
///
/// Expired resource versions (410 Gone) are split out so the watcher can
/// resubscribe without waiting.
#[must_use]
pub fn classify_watch_error(message: &str) -> TransportError {
    let expired = message.contains("410")
        || message.contains("too old resource version")
        || message.contains("Expired")
        || message.contains("Gone");
    if expired {
        TransportError::Expired(message.to_string())
    } else {
        TransportError::Disconnected(message.to_string())
    }
}

fn cluster_error(e: kube::Error) -> ReloadError {
    ReloadError::Cluster(e.to_string())
}

/// Render labels as a Kubernetes equality-based selector (`a=b,c=d`)
#[must_use]
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn key_from_meta(kind: SourceKind, meta: &ObjectMeta, fallback_namespace: &str) -> SourceKey {
    SourceKey::new(
        kind,
        meta.namespace.as_deref().unwrap_or(fallback_namespace),
        meta.name.as_deref().unwrap_or_default(),
    )
}

fn configmap_to_raw(cm: ConfigMap, namespace: &str) -> RawSource {
    RawSource {
        key: key_from_meta(SourceKind::ConfigMap, &cm.metadata, namespace),
        labels: cm.metadata.labels.unwrap_or_default(),
        data: cm.data.unwrap_or_default(),
        resource_version: cm.metadata.resource_version.unwrap_or_default(),
    }
}

fn secret_to_raw(secret: Secret, namespace: &str) -> RawSource {
    let data = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, general_purpose::STANDARD.encode(v.0)))
        .collect();
    RawSource {
        key: key_from_meta(SourceKind::Secret, &secret.metadata, namespace),
        labels: secret.metadata.labels.unwrap_or_default(),
        data,
        resource_version: secret.metadata.resource_version.unwrap_or_default(),
    }
}

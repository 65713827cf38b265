//! # Errors
//!
//! Error taxonomy for resolution, snapshot building and refresh.
//!
//! Resolution-time errors abort the current recomputation and keep the last
//! applied snapshot. Transport errors never leave the watcher. Refresh errors
//! are logged and counted but do not block later reloads.

use crate::source::{SourceKey, SourceKind};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: SourceKind,
        namespace: String,
        name: String,
    },

    #[error("no {kind} in namespace '{namespace}' matches labels {labels:?}")]
    EmptySelection {
        kind: SourceKind,
        namespace: String,
        labels: BTreeMap<String, String>,
    },

    #[error("failed to decode '{property}' of {source_key}: {reason}")]
    Decode {
        source_key: SourceKey,
        property: String,
        reason: String,
    },

    #[error("failed to parse embedded document '{property}' of {source_key}: {reason}")]
    EmbeddedFormat {
        source_key: SourceKey,
        property: String,
        reason: String,
    },

    #[error("cluster request failed: {0}")]
    Cluster(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("refresh failed: {0}")]
    Refresh(String),

    #[error("refresh timed out after {0:?}")]
    RefreshTimeout(Duration),
}

impl ReloadError {
    /// Short label used for metrics and log fields
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadError::NotFound { .. } => "not-found",
            ReloadError::EmptySelection { .. } => "empty-selection",
            ReloadError::Decode { .. } => "decode",
            ReloadError::EmbeddedFormat { .. } => "embedded-format",
            ReloadError::Cluster(_) => "cluster",
            ReloadError::Transport(_) => "transport",
            ReloadError::Refresh(_) => "refresh",
            ReloadError::RefreshTimeout(_) => "refresh-timeout",
        }
    }
}

/// Watch stream failure. Recoverable: the watcher resubscribes.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("watch stream disconnected: {0}")]
    Disconnected(String),

    #[error("watch resource version expired: {0}")]
    Expired(String),
}

pub type Result<T, E = ReloadError> = std::result::Result<T, E>;

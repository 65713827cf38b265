//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use config_reload_controller::prelude::*;
//! ```

// Source model
pub use crate::source::{RawSource, ResolvedSource, Selection, SourceKey, SourceKind, SourceRule};

// Cluster capability
pub use crate::cluster::{
    kubernetes::KubeCluster, memory::InMemoryCluster, ClusterApi, ClusterEvent,
};

// Pipeline
pub use crate::resolver::{EmptySelectorPolicy, Resolution, ResolverOptions, SourceResolver};
pub use crate::runtime::reload_loop::ConfigReloader;
pub use crate::snapshot::{EffectiveSnapshot, SnapshotDiff};
pub use crate::trigger::{RefreshCallback, ReloadOutcome, ReloadState, ReloadTrigger, TriggerPhase};
pub use crate::watcher::{ChangeEvent, WatchInterest, Watcher, WatcherOptions};

// Refresh callbacks
pub use crate::refresh::{FileRefresh, HttpRefresh, LogRefresh};

// Config types
pub use crate::config::{ReloadConfig, ReloadMode, SourcesFile};

// Common error types
pub use crate::error::{ReloadError, TransportError};

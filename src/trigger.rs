//! # Reload Trigger
//!
//! Owns the last applied snapshot and decides whether a freshly built one
//! warrants a refresh.
//!
//! ## State Machine
//!
//! ```text
//! Idle --begin--> Computing --apply(changed)--> Applied
//!                     |
//!                     +--apply(unchanged | build error)--> Idle
//! ```
//!
//! - A snapshot whose properties equal the stored ones never fires a refresh.
//! - A changed snapshot fires the refresh once and replaces the stored
//!   state; a failed or timed-out refresh is reported but not rolled back.
//! - A build error leaves the stored state untouched.

use crate::error::{ReloadError, Result};
use crate::observability::metrics;
use crate::runtime::error_policy::report_build_error;
use crate::snapshot::{EffectiveSnapshot, SnapshotDiff};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Applies a new snapshot to the running application
///
/// Implementations must be idempotent: calling twice with the same snapshot
/// has the same effect as calling once.
#[async_trait]
pub trait RefreshCallback: Send + Sync {
    async fn refresh(&self, snapshot: &EffectiveSnapshot) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "callback"
    }
}

/// Last applied snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadState {
    pub snapshot: EffectiveSnapshot,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPhase {
    Idle,
    Computing,
    Applied,
}

impl TriggerPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPhase::Idle => "idle",
            TriggerPhase::Computing => "computing",
            TriggerPhase::Applied => "applied",
        }
    }
}

/// Result of offering one build result to the trigger
#[derive(Debug)]
pub enum ReloadOutcome {
    /// State replaced and refresh succeeded
    Applied { diff: SnapshotDiff },
    /// Properties equal the stored snapshot; nothing fired
    Unchanged,
    /// Build failed; stored state kept
    BuildFailed(ReloadError),
    /// State replaced but the refresh failed or timed out
    RefreshFailed { diff: SnapshotDiff, error: ReloadError },
}

impl ReloadOutcome {
    /// True when the stored state was replaced
    #[must_use]
    pub fn replaced_state(&self) -> bool {
        matches!(self, Self::Applied { .. } | Self::RefreshFailed { .. })
    }
}

pub struct ReloadTrigger {
    state: Option<ReloadState>,
    phase: TriggerPhase,
    refresh: Arc<dyn RefreshCallback>,
    refresh_timeout: Duration,
}

impl std::fmt::Debug for ReloadTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadTrigger")
            .field("phase", &self.phase)
            .field("refresh", &self.refresh.name())
            .field("refresh_timeout", &self.refresh_timeout)
            .field(
                "properties",
                &self.state.as_ref().map(|s| s.snapshot.len()),
            )
            .finish()
    }
}

impl ReloadTrigger {
    pub fn new(refresh: Arc<dyn RefreshCallback>, refresh_timeout: Duration) -> Self {
        Self {
            state: None,
            phase: TriggerPhase::Idle,
            refresh,
            refresh_timeout,
        }
    }

    #[must_use]
    pub fn phase(&self) -> TriggerPhase {
        self.phase
    }

    #[must_use]
    pub fn state(&self) -> Option<&ReloadState> {
        self.state.as_ref()
    }

    /// Snapshot currently applied, if any
    #[must_use]
    pub fn current(&self) -> Option<&EffectiveSnapshot> {
        self.state.as_ref().map(|s| &s.snapshot)
    }

    /// Mark the start of a recomputation
    pub fn begin(&mut self) {
        self.phase = TriggerPhase::Computing;
    }

    /// Offer a build result
    ///
    /// Compares against the stored snapshot and refreshes at most once.
    pub async fn apply(&mut self, built: Result<EffectiveSnapshot>) -> ReloadOutcome {
        let snapshot = match built {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report_build_error(&e);
                self.phase = TriggerPhase::Idle;
                return ReloadOutcome::BuildFailed(e);
            }
        };

        if let Some(current) = &self.state {
            if current.snapshot.same_properties(&snapshot) {
                self.phase = TriggerPhase::Idle;
                return ReloadOutcome::Unchanged;
            }
        }

        let diff = match &self.state {
            Some(current) => current.snapshot.diff(&snapshot),
            None => EffectiveSnapshot::default().diff(&snapshot),
        };

        let refresh = self.refresh.refresh(&snapshot);
        let result = match tokio::time::timeout(self.refresh_timeout, refresh).await {
            Ok(result) => result,
            Err(_) => Err(ReloadError::RefreshTimeout(self.refresh_timeout)),
        };

        // Replaced whether or not the refresh succeeded
        self.state = Some(ReloadState {
            snapshot,
            applied_at: Utc::now(),
        });
        self.phase = TriggerPhase::Applied;

        match result {
            Ok(()) => {
                metrics::increment_refreshes();
                info!(
                    refresh = self.refresh.name(),
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    changed = diff.changed.len(),
                    "reload.refresh.succeeded"
                );
                ReloadOutcome::Applied { diff }
            }
            Err(e) => {
                metrics::increment_refresh_errors(e.as_str());
                error!(
                    refresh = self.refresh.name(),
                    error = %e,
                    error_type = e.as_str(),
                    "reload.refresh.failed"
                );
                ReloadOutcome::RefreshFailed { diff, error: e }
            }
        }
    }
}

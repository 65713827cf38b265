//! # Reload Loop
//!
//! Single consumer that turns change notifications into applied snapshots.
//!
//! ## Flow
//!
//! 1. `start` resolves and builds the initial snapshot (any error aborts
//!    startup) and hands it to the refresh callback.
//! 2. In event mode `run` waits for a change, keeps collecting changes for
//!    the debounce window, then re-resolves and rebuilds once for the batch.
//!    In polling mode it does the same on a fixed period without watching.
//! 3. The trigger decides whether the new snapshot fires a refresh.
//! 4. When the resolved key set changes (an object gained a label, a
//!    profile source appeared) the watcher is restarted with the new
//!    interest.
//!
//! Recomputation is serialized: at most one snapshot is applied at a time.

use crate::cluster::ClusterApi;
use crate::config::{ReloadConfig, ReloadMode};
use crate::error::Result;
use crate::observability::metrics;
use crate::resolver::{Resolution, SourceResolver};
use crate::snapshot::EffectiveSnapshot;
use crate::source::SourceRule;
use crate::trigger::{RefreshCallback, ReloadOutcome, ReloadState, ReloadTrigger, TriggerPhase};
use crate::watcher::{ChangeEvent, WatchInterest, Watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

pub struct ConfigReloader<C: ?Sized> {
    resolver: SourceResolver<C>,
    rules: Vec<SourceRule>,
    config: ReloadConfig,
    trigger: ReloadTrigger,
    interest: WatchInterest,
    watcher: Option<Watcher>,
}

impl<C: ?Sized> std::fmt::Debug for ConfigReloader<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigReloader")
            .field("rules", &self.rules.len())
            .field("mode", &self.config.mode)
            .field("trigger", &self.trigger)
            .field("watching", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl<C> ConfigReloader<C>
where
    C: ClusterApi + ?Sized + 'static,
{
    /// Resolve, build and apply the initial snapshot, then start watching
    ///
    /// # Errors
    ///
    /// Any resolution or build error. A failing initial refresh is only
    /// logged; the snapshot still counts as applied.
    pub async fn start(
        resolver: SourceResolver<C>,
        rules: Vec<SourceRule>,
        config: ReloadConfig,
        refresh: Arc<dyn RefreshCallback>,
    ) -> Result<Self> {
        let span = tracing::info_span!(
            "reload.recompute",
            trigger = "startup",
            namespace = config.namespace.as_str()
        );
        let resolution = resolver
            .resolve(&rules, &config.namespace)
            .instrument(span.clone())
            .await?;
        let snapshot = EffectiveSnapshot::from_resolution(&resolution)?;

        let mut trigger = ReloadTrigger::new(refresh, config.refresh_timeout);
        trigger.begin();
        let outcome = trigger.apply(Ok(snapshot)).instrument(span).await;
        if let ReloadOutcome::RefreshFailed { error, .. } = &outcome {
            warn!(error = %error, "Initial refresh failed, continuing with the resolved snapshot");
        }

        let mut reloader = Self {
            resolver,
            rules,
            config,
            trigger,
            interest: WatchInterest::default(),
            watcher: None,
        };
        reloader.publish_gauges();
        reloader.update_interest(&resolution);

        info!(
            mode = reloader.config.mode.as_str(),
            sources = resolution.sources.len(),
            properties = reloader.current().map_or(0, EffectiveSnapshot::len),
            "reload.started"
        );
        Ok(reloader)
    }

    /// Drive the loop until `shutdown` completes. Watch tasks stop on return.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        match self.config.mode {
            ReloadMode::Event => self.run_events(shutdown.as_mut()).await,
            ReloadMode::Polling { period } => self.run_polling(period, shutdown.as_mut()).await,
        }
        self.watcher = None;
        info!("reload.stopped");
    }

    /// Snapshot currently applied
    #[must_use]
    pub fn current(&self) -> Option<&EffectiveSnapshot> {
        self.trigger.current()
    }

    #[must_use]
    pub fn state(&self) -> Option<&ReloadState> {
        self.trigger.state()
    }

    #[must_use]
    pub fn phase(&self) -> TriggerPhase {
        self.trigger.phase()
    }

    /// Objects the watcher is currently subscribed for
    #[must_use]
    pub fn interest(&self) -> &WatchInterest {
        &self.interest
    }

    /// Re-resolve, rebuild and offer the result to the trigger
    pub async fn recompute(&mut self, reason: &'static str, events: usize) -> ReloadOutcome {
        let span = tracing::info_span!("reload.recompute", trigger = reason, events);
        async {
            metrics::increment_recomputations();
            let started = Instant::now();
            self.trigger.begin();

            let (built, resolution) = match self
                .resolver
                .resolve(&self.rules, &self.config.namespace)
                .await
            {
                Ok(resolution) => (
                    EffectiveSnapshot::from_resolution(&resolution),
                    Some(resolution),
                ),
                Err(e) => (Err(e), None),
            };
            metrics::observe_recomputation_duration(started.elapsed().as_secs_f64());

            let outcome = self.trigger.apply(built).await;
            if matches!(outcome, ReloadOutcome::Unchanged) {
                debug!("reload.snapshot.unchanged");
            }
            self.publish_gauges();
            if let Some(resolution) = resolution {
                self.update_interest(&resolution);
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_events<F>(&mut self, mut shutdown: Pin<&mut F>)
    where
        F: Future<Output = ()>,
    {
        loop {
            let Some(watcher) = self.watcher.as_mut() else {
                info!("No sources to watch, waiting for shutdown");
                shutdown.await;
                return;
            };

            let first = tokio::select! {
                () = shutdown.as_mut() => return,
                event = watcher.next() => event,
            };
            let Some(first) = first else {
                warn!("All watch tasks stopped, waiting for shutdown");
                shutdown.await;
                return;
            };

            let batch = collect_batch(watcher, first, self.config.debounce).await;
            debug!(
                events = batch.len(),
                first = %batch[0].key,
                "reload.batch.collected"
            );
            self.recompute("watch", batch.len()).await;
        }
    }

    async fn run_polling<F>(&mut self, period: Duration, mut shutdown: Pin<&mut F>)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the initial snapshot already covers it
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.as_mut() => return,
                _ = ticker.tick() => {
                    self.recompute("poll", 0).await;
                }
            }
        }
    }

    fn update_interest(&mut self, resolution: &Resolution) {
        let interest = self
            .resolver
            .interest(&self.rules, &self.config.namespace, resolution)
            .restrict_kinds(self.config.monitor_config_maps, self.config.monitor_secrets);
        if interest == self.interest && (self.watcher.is_some() || !self.should_watch(&interest)) {
            return;
        }

        self.watcher = if self.should_watch(&interest) {
            info!(streams = interest.streams().len(), "watch.interest.updated");
            Some(Watcher::spawn(
                Arc::clone(self.resolver.cluster()),
                interest.clone(),
                self.config.watcher_options(),
            ))
        } else {
            None
        };
        self.interest = interest;
    }

    fn should_watch(&self, interest: &WatchInterest) -> bool {
        matches!(self.config.mode, ReloadMode::Event) && !interest.is_empty()
    }

    fn publish_gauges(&self) {
        if let Some(snapshot) = self.trigger.current() {
            metrics::set_snapshot_properties(snapshot.len());
        }
    }
}

/// Keep reading changes until `window` has passed since the first one
async fn collect_batch(
    watcher: &mut Watcher,
    first: ChangeEvent,
    window: Duration,
) -> Vec<ChangeEvent> {
    let mut batch = vec![first];
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, watcher.next()).await {
        batch.push(event);
    }
    batch
}

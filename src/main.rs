//! # Config Reload Controller
//!
//! Runs next to an application (typically as a sidecar) and keeps its
//! externalized configuration in step with Kubernetes ConfigMaps and Secrets.
//!
//! ## Overview
//!
//! 1. **Resolve sources** - ConfigMaps and Secrets selected by name or labels,
//!    as declared in the sources file
//! 2. **Build a snapshot** - merge their data into flat properties, applying
//!    prefixes and decoding Secrets
//! 3. **Watch** - subscribe to changes (or poll on a fixed period)
//! 4. **Refresh** - POST to the application's refresh endpoint, rewrite a
//!    properties file, or just log, whenever the snapshot really changes
//!
//! Metrics and probes are served on `METRICS_PORT` (default 5000).

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config_reload_controller::cli::Cli;
use config_reload_controller::cluster::kubernetes::KubeCluster;
use config_reload_controller::cluster::ClusterApi;
use config_reload_controller::config::{ReloadConfig, SourcesFile};
use config_reload_controller::observability;
use config_reload_controller::refresh::{FileRefresh, HttpRefresh, LogRefresh};
use config_reload_controller::resolver::SourceResolver;
use config_reload_controller::runtime::reload_loop::ConfigReloader;
use config_reload_controller::server::{start_server, ServerState};
use config_reload_controller::trigger::RefreshCallback;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Configure rustls crypto provider before any TLS client is created
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    let mut config = ReloadConfig::from_env();
    init_tracing(&config.log_format);

    info!("Starting Config Reload Controller v{}", env!("CARGO_PKG_VERSION"));

    let sources = SourcesFile::load(&cli.sources)?;
    if let Some(namespace) = &sources.namespace {
        config.namespace.clone_from(namespace);
    }
    let rules = sources.rules()?;
    info!(
        sources_file = %cli.sources.display(),
        rules = rules.len(),
        namespace = config.namespace.as_str(),
        mode = config.mode.as_str(),
        "Loaded source rules"
    );

    observability::metrics::register_metrics()?;
    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let refresh: Arc<dyn RefreshCallback> = match (&cli.refresh_url, &cli.output_file) {
        (Some(url), _) => Arc::new(HttpRefresh::new(url.clone(), config.refresh_timeout)?),
        (None, Some(path)) => Arc::new(FileRefresh::new(path.clone())),
        (None, None) => Arc::new(LogRefresh),
    };
    info!(refresh = refresh.name(), "Refresh callback configured");

    let cluster: Arc<dyn ClusterApi> = Arc::new(
        KubeCluster::try_default()
            .await
            .context("Failed to create Kubernetes client")?,
    );
    let resolver = SourceResolver::new(
        cluster,
        config.resolver_options(sources.use_name_as_prefix, sources.profiles.clone()),
    );

    let mut reloader = ConfigReloader::start(resolver, rules, config, refresh)
        .await
        .context("Initial configuration could not be resolved")?;
    server_state.is_ready.store(true, Ordering::Relaxed);

    reloader
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await;

    server_state.is_ready.store(false, Ordering::Relaxed);
    Ok(())
}

fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "config_reload_controller=info".into());
    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

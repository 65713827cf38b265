//! Config Reload Controller Library
//!
//! Resolves configuration sources (Kubernetes ConfigMaps and Secrets selected
//! by name or labels), merges them into one effective property snapshot and
//! refreshes the running application whenever that snapshot changes.
//!
//! ## Quick Start
//!
//! ```rust
//! use config_reload_controller::prelude::*;
//! ```
//!
//! ## Pipeline
//!
//! [`resolver::SourceResolver`] -> [`watcher::Watcher`] ->
//! [`snapshot::build`] -> [`trigger::ReloadTrigger`], driven by
//! [`runtime::reload_loop::ConfigReloader`].

pub mod backoff;
pub mod binding;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod error;
pub mod observability;
pub mod prelude;
pub mod refresh;
pub mod resolver;
pub mod runtime;
pub mod server;
pub mod snapshot;
pub mod source;
pub mod trigger;
pub mod watcher;

//! # Configuration
//!
//! - [`reload`]: runtime settings from environment variables
//! - [`sources`]: declarative source rules from a YAML file

pub mod reload;
pub mod sources;

pub use reload::{ReloadConfig, ReloadMode};
pub use sources::{SourceEntry, SourcesFile};

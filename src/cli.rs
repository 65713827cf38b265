//! # Command Line
//!
//! Flags for the `config-reload-controller` binary. Every flag has an
//! environment fallback so the deployment can configure it through `envFrom`.
//!
//! ```bash
//! config-reload-controller --sources /etc/config-reload/sources.yaml \
//!     --refresh-url http://localhost:8080/actuator/refresh
//! ```

use crate::constants::DEFAULT_SOURCES_FILE;
use clap::Parser;
use std::path::PathBuf;

/// Watches ConfigMaps and Secrets and refreshes the application when its configuration changes
#[derive(Debug, Parser)]
#[command(name = "config-reload-controller", version, about, long_about = None)]
pub struct Cli {
    /// YAML file declaring the ConfigMap and Secret sources
    #[arg(long, env = "SOURCES_FILE", default_value = DEFAULT_SOURCES_FILE)]
    pub sources: PathBuf,

    /// Endpoint that receives a POST after each change (e.g. /actuator/refresh)
    #[arg(long, env = "REFRESH_URL", conflicts_with = "output_file")]
    pub refresh_url: Option<String>,

    /// Properties file rewritten after each change
    #[arg(long, env = "OUTPUT_FILE")]
    pub output_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_refresh_url() {
        let cli = Cli::try_parse_from([
            "config-reload-controller",
            "--sources",
            "sources.yaml",
            "--refresh-url",
            "http://localhost:8080/actuator/refresh",
        ])
        .unwrap();
        assert_eq!(cli.sources, PathBuf::from("sources.yaml"));
        assert_eq!(cli.refresh_url.as_deref(), Some("http://localhost:8080/actuator/refresh"));
        assert!(cli.output_file.is_none());
    }

    #[test]
    fn test_refresh_url_and_output_file_conflict() {
        let result = Cli::try_parse_from([
            "config-reload-controller",
            "--refresh-url",
            "http://x",
            "--output-file",
            "/tmp/app.properties",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

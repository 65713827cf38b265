//! # Sources File
//!
//! Declarative source rules loaded from YAML:
//!
//! ```yaml
//! namespace: spring-k8s
//! useNameAsPrefix: true
//! profiles: [dev]
//! configMaps:
//!   - name: app
//! secrets:
//!   - name: secret-two
//!     explicitPrefix: two
//!   - labels: { letter: c }
//! ```
//!
//! ConfigMap rules are merged before Secret rules, so Secrets win on
//! key collisions.

use crate::source::{Selection, SourceKind, SourceRule};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourcesFile {
    /// Overrides `POD_NAMESPACE` when set
    #[serde(default)]
    pub namespace: Option<String>,
    /// Default for entries that do not set `useNameAsPrefix`
    #[serde(default)]
    pub use_name_as_prefix: bool,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub config_maps: Vec<SourceEntry>,
    #[serde(default)]
    pub secrets: Vec<SourceEntry>,
}

/// One source entry; exactly one of `name` and `labels` must be set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub use_name_as_prefix: Option<bool>,
    #[serde(default)]
    pub explicit_prefix: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl SourcesFile {
    /// Read and parse a sources file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sources file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid sources file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let file: Self =
            serde_yaml::from_str(contents).context("Failed to parse sources YAML")?;
        // Validate eagerly so a bad entry fails at startup
        file.rules()?;
        Ok(file)
    }

    /// Source rules in merge order: ConfigMaps first, then Secrets
    pub fn rules(&self) -> Result<Vec<SourceRule>> {
        let config_maps = self
            .config_maps
            .iter()
            .enumerate()
            .map(|(idx, entry)| entry.to_rule(SourceKind::ConfigMap, idx));
        let secrets = self
            .secrets
            .iter()
            .enumerate()
            .map(|(idx, entry)| entry.to_rule(SourceKind::Secret, idx));
        config_maps.chain(secrets).collect()
    }
}

impl SourceEntry {
    fn to_rule(&self, kind: SourceKind, idx: usize) -> Result<SourceRule> {
        let list = match kind {
            SourceKind::ConfigMap => "configMaps",
            SourceKind::Secret => "secrets",
        };
        let selection = match (&self.name, &self.labels) {
            (Some(name), None) if !name.trim().is_empty() => Selection::Name(name.clone()),
            (Some(_), None) => bail!("{list}[{idx}]: name must not be empty"),
            (None, Some(labels)) if !labels.is_empty() => Selection::Labels(labels.clone()),
            (None, Some(_)) => bail!("{list}[{idx}]: labels must not be empty"),
            (Some(_), Some(_)) => bail!("{list}[{idx}]: set either name or labels, not both"),
            (None, None) => bail!("{list}[{idx}]: one of name or labels is required"),
        };

        Ok(SourceRule {
            kind,
            selection,
            use_name_as_prefix: self.use_name_as_prefix,
            explicit_prefix: self.explicit_prefix.clone(),
            namespace: self.namespace.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LABELED_SECRETS: &str = r"
namespace: spring-k8s
useNameAsPrefix: true
secrets:
  - labels: { letter: a }
    useNameAsPrefix: false
  - labels: { letter: b }
    explicitPrefix: two
  - labels: { letter: c }
";

    #[test]
    fn test_parse_labeled_secrets() {
        let file = SourcesFile::parse(LABELED_SECRETS).unwrap();
        assert_eq!(file.namespace.as_deref(), Some("spring-k8s"));
        assert!(file.use_name_as_prefix);

        let rules = file.rules().unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].use_name_as_prefix, Some(false));
        assert_eq!(rules[1].explicit_prefix.as_deref(), Some("two"));
        assert!(matches!(
            rules[2].selection,
            Selection::Labels(ref l) if l.get("letter").map(String::as_str) == Some("c")
        ));
        assert!(rules.iter().all(|r| r.kind == SourceKind::Secret));
    }

    #[test]
    fn test_config_maps_come_before_secrets() {
        let file = SourcesFile::parse("secrets:\n  - name: s\nconfigMaps:\n  - name: c\n").unwrap();
        let rules = file.rules().unwrap();
        assert_eq!(rules[0].kind, SourceKind::ConfigMap);
        assert_eq!(rules[1].kind, SourceKind::Secret);
    }

    #[test]
    fn test_entry_needs_exactly_one_selection() {
        let both = SourcesFile::parse("secrets:\n  - name: s\n    labels: { a: b }\n");
        assert!(both.is_err());

        let neither = SourcesFile::parse("configMaps:\n  - explicitPrefix: x\n");
        let message = format!("{:#}", neither.unwrap_err());
        assert!(message.contains("configMaps[0]"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(SourcesFile::parse("secrets:\n  - nmae: typo\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LABELED_SECRETS.as_bytes()).unwrap();

        let loaded = SourcesFile::load(file.path()).unwrap();
        assert_eq!(loaded.secrets.len(), 3);

        let missing = SourcesFile::load(Path::new("/nonexistent/sources.yaml"));
        assert!(format!("{:#}", missing.unwrap_err()).contains("Failed to read sources file"));
    }
}

//! # Sources
//!
//! Data model for configuration sources: the declarative rules that select
//! ConfigMaps and Secrets, the concrete keys they resolve to, and the raw
//! objects fetched from the cluster.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of cluster object a source is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    ConfigMap,
    Secret,
}

impl SourceKind {
    /// Get human-readable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ConfigMap => "configmap",
            SourceKind::Secret => "secret",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule picks its objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A single object looked up by name
    Name(String),
    /// Every object in the namespace carrying all of these labels
    Labels(BTreeMap<String, String>),
}

impl Selection {
    /// Returns true when `labels` contains every pair of this selector.
    /// Name selections never match by labels.
    #[must_use]
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Selection::Name(_) => false,
            Selection::Labels(selector) => selector
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value)),
        }
    }
}

/// Declarative source rule
///
/// `explicit_prefix` wins over `use_name_as_prefix`. When `use_name_as_prefix`
/// is `None` the resolver falls back to its global default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRule {
    pub kind: SourceKind,
    pub selection: Selection,
    pub use_name_as_prefix: Option<bool>,
    pub explicit_prefix: Option<String>,
    /// Namespace override; the resolver's namespace is used when absent
    pub namespace: Option<String>,
}

impl SourceRule {
    /// Rule selecting one object by name
    pub fn named(kind: SourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            selection: Selection::Name(name.into()),
            use_name_as_prefix: None,
            explicit_prefix: None,
            namespace: None,
        }
    }

    /// Rule selecting every object that carries `labels`
    pub fn labeled<K, V>(kind: SourceKind, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind,
            selection: Selection::Labels(
                labels
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            use_name_as_prefix: None,
            explicit_prefix: None,
            namespace: None,
        }
    }

    #[must_use]
    pub fn with_name_as_prefix(mut self, enabled: bool) -> Self {
        self.use_name_as_prefix = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_explicit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.explicit_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Identity of one concrete configuration source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    pub namespace: String,
    pub name: String,
    pub kind: SourceKind,
}

impl SourceKey {
    pub fn new(kind: SourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Object as fetched from the cluster
///
/// Secret values in `data` are Base64-encoded; ConfigMap values are plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSource {
    pub key: SourceKey,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
    pub resource_version: String,
}

/// A source chosen by the resolver together with the prefix its properties bind under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub key: SourceKey,
    pub prefix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_requires_every_pair() {
        let selection = Selection::Labels(BTreeMap::from([
            ("letter".to_string(), "c".to_string()),
            ("app".to_string(), "demo".to_string()),
        ]));

        let both = BTreeMap::from([
            ("letter".to_string(), "c".to_string()),
            ("app".to_string(), "demo".to_string()),
            ("extra".to_string(), "x".to_string()),
        ]);
        let one = BTreeMap::from([("letter".to_string(), "c".to_string())]);

        assert!(selection.matches_labels(&both));
        assert!(!selection.matches_labels(&one));
    }

    #[test]
    fn test_name_selection_never_matches_labels() {
        let selection = Selection::Name("app".to_string());
        assert!(!selection.matches_labels(&BTreeMap::new()));
    }

    #[test]
    fn test_source_key_ordering_is_by_namespace_then_name() {
        let a = SourceKey::new(SourceKind::Secret, "default", "a");
        let b = SourceKey::new(SourceKind::ConfigMap, "default", "b");
        assert!(a < b);
        assert_eq!(a.to_string(), "secret/default/a");
    }
}

//! # Source Resolver
//!
//! Turns declarative [`SourceRule`]s into concrete sources.
//!
//! - **Name rules** look up one object. A missing object is a `NotFound`
//!   error when `fail_fast` is set, otherwise it is skipped.
//! - **Label rules** list every matching object, ordered by name so merge
//!   order stays stable between resolutions. Zero matches is handled by the
//!   configured [`EmptySelectorPolicy`].
//! - **Profiles**: for every active profile `p`, a name rule `n` also picks up
//!   the optional object `n-p`, placed right after `n`.
//!
//! Prefix precedence: explicit prefix, then name-as-prefix (per rule, falling
//! back to the global default), then no prefix.

use crate::cluster::ClusterApi;
use crate::error::{ReloadError, Result};
use crate::source::{RawSource, ResolvedSource, Selection, SourceKey, SourceRule};
use crate::watcher::WatchInterest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do when a label selector matches nothing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptySelectorPolicy {
    /// Continue with no sources for that rule
    #[default]
    Proceed,
    /// Abort resolution with `EmptySelection`
    Fail,
}

impl std::str::FromStr for EmptySelectorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proceed" => Ok(Self::Proceed),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown empty selector policy '{other}'")),
        }
    }
}

/// Resolution settings shared by every rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Missing name-selected sources are errors instead of being skipped
    pub fail_fast: bool,
    pub empty_selector: EmptySelectorPolicy,
    /// Default for rules that leave `use_name_as_prefix` unset
    pub use_name_as_prefix: bool,
    /// Active profiles for profile-specific sources
    pub profiles: Vec<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            fail_fast: true,
            empty_selector: EmptySelectorPolicy::Proceed,
            use_name_as_prefix: false,
            profiles: Vec::new(),
        }
    }
}

/// Result of one resolution pass
///
/// Holds the ordered sources plus the raw objects fetched while resolving,
/// so the snapshot builder works on exactly the state that was resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub sources: Vec<ResolvedSource>,
    raw: BTreeMap<SourceKey, RawSource>,
}

impl Resolution {
    /// Raw object for a resolved key
    #[must_use]
    pub fn fetch(&self, key: &SourceKey) -> Option<&RawSource> {
        self.raw.get(key)
    }

    /// Every distinct key in this resolution
    pub fn keys(&self) -> impl Iterator<Item = &SourceKey> {
        self.raw.keys()
    }

    fn push(&mut self, raw: RawSource, prefix: Option<String>) {
        self.sources.push(ResolvedSource {
            key: raw.key.clone(),
            prefix,
        });
        self.raw.insert(raw.key.clone(), raw);
    }
}

/// Resolves source rules against a cluster
pub struct SourceResolver<C: ?Sized> {
    cluster: Arc<C>,
    options: ResolverOptions,
}

impl<C: ?Sized> std::fmt::Debug for SourceResolver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceResolver")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<C: ClusterApi + ?Sized> SourceResolver<C> {
    pub fn new(cluster: Arc<C>, options: ResolverOptions) -> Self {
        Self { cluster, options }
    }

    #[must_use]
    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    #[must_use]
    pub fn cluster(&self) -> &Arc<C> {
        &self.cluster
    }

    /// Resolve `rules` in declaration order against `namespace`
    ///
    /// # Errors
    ///
    /// - `NotFound` when a name-selected source is absent and `fail_fast` is set
    /// - `EmptySelection` when a selector matches nothing under `EmptySelectorPolicy::Fail`
    /// - `Cluster` when the API request itself fails
    pub async fn resolve(&self, rules: &[SourceRule], namespace: &str) -> Result<Resolution> {
        let mut resolution = Resolution::default();

        for rule in rules {
            let ns = rule.namespace.as_deref().unwrap_or(namespace);
            match &rule.selection {
                Selection::Name(name) => {
                    match self.cluster.get(rule.kind, ns, name).await? {
                        Some(raw) => {
                            debug!(
                                source.kind = rule.kind.as_str(),
                                source.namespace = ns,
                                source.name = name.as_str(),
                                "resolver.source.found"
                            );
                            resolution.push(raw, self.prefix_for(rule, name));
                        }
                        None if self.options.fail_fast => {
                            return Err(ReloadError::NotFound {
                                kind: rule.kind,
                                namespace: ns.to_string(),
                                name: name.clone(),
                            });
                        }
                        None => {
                            warn!(
                                source.kind = rule.kind.as_str(),
                                source.namespace = ns,
                                source.name = name.as_str(),
                                "Source not found, skipping (fail-fast disabled)"
                            );
                        }
                    }

                    for profile_name in self.profile_names(name) {
                        if let Some(raw) = self.cluster.get(rule.kind, ns, &profile_name).await? {
                            debug!(
                                source.kind = rule.kind.as_str(),
                                source.namespace = ns,
                                source.name = profile_name.as_str(),
                                "resolver.profile_source.found"
                            );
                            resolution.push(raw, self.prefix_for(rule, name));
                        }
                    }
                }
                Selection::Labels(labels) => {
                    let mut matches = self.cluster.list(rule.kind, ns, labels).await?;
                    if matches.is_empty() {
                        match self.options.empty_selector {
                            EmptySelectorPolicy::Fail => {
                                return Err(ReloadError::EmptySelection {
                                    kind: rule.kind,
                                    namespace: ns.to_string(),
                                    labels: labels.clone(),
                                });
                            }
                            EmptySelectorPolicy::Proceed => {
                                warn!(
                                    source.kind = rule.kind.as_str(),
                                    source.namespace = ns,
                                    labels = ?labels,
                                    "Label selector matched no objects"
                                );
                            }
                        }
                    }
                    matches.sort_by(|a, b| a.key.name.cmp(&b.key.name));
                    for raw in matches {
                        let prefix = self.prefix_for(rule, &raw.key.name);
                        debug!(
                            source.kind = rule.kind.as_str(),
                            source.namespace = ns,
                            source.name = raw.key.name.as_str(),
                            "resolver.source.matched"
                        );
                        resolution.push(raw, prefix);
                    }
                }
            }
        }

        Ok(resolution)
    }

    /// Objects whose changes can alter the result of resolving `rules`
    ///
    /// Covers declared names (present or not), profile variants and label
    /// selectors, plus every key in `current`.
    pub fn interest(
        &self,
        rules: &[SourceRule],
        namespace: &str,
        current: &Resolution,
    ) -> WatchInterest {
        let mut interest = WatchInterest::default();
        for rule in rules {
            let ns = rule.namespace.as_deref().unwrap_or(namespace);
            match &rule.selection {
                Selection::Name(name) => {
                    interest.add_key(SourceKey::new(rule.kind, ns, name.as_str()));
                    for profile_name in self.profile_names(name) {
                        interest.add_key(SourceKey::new(rule.kind, ns, profile_name));
                    }
                }
                Selection::Labels(labels) => {
                    interest.add_selector(rule.kind, ns, labels.clone());
                }
            }
        }
        for key in current.keys() {
            interest.add_key(key.clone());
        }
        interest
    }

    fn profile_names<'a>(&'a self, name: &'a str) -> impl Iterator<Item = String> + 'a {
        self.options
            .profiles
            .iter()
            .map(move |profile| format!("{name}-{profile}"))
    }

    fn prefix_for(&self, rule: &SourceRule, name: &str) -> Option<String> {
        if let Some(prefix) = rule.explicit_prefix.as_deref().filter(|p| !p.is_empty()) {
            return Some(prefix.to_string());
        }
        if rule
            .use_name_as_prefix
            .unwrap_or(self.options.use_name_as_prefix)
        {
            return Some(name.to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::source::SourceKind;

    fn labeled_secrets() -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.put_secret(
            "spring-k8s",
            "secret-one",
            [("letter", "a")],
            [("one.property", "one")],
        );
        cluster.put_secret("spring-k8s", "secret-two", [("letter", "b")], [("property", "two")]);
        cluster.put_secret(
            "spring-k8s",
            "secret-three",
            [("letter", "c")],
            [("property", "three")],
        );
        cluster.put_secret("spring-k8s", "secret-four", [("letter", "d")], [("property", "four")]);
        cluster
    }

    fn name_prefix_options() -> ResolverOptions {
        ResolverOptions {
            use_name_as_prefix: true,
            ..ResolverOptions::default()
        }
    }

    mod prefix_tests {
        use super::*;

        #[tokio::test]
        async fn test_rule_override_disables_global_name_prefix() {
            let resolver = SourceResolver::new(labeled_secrets(), name_prefix_options());
            let rules = vec![SourceRule::labeled(SourceKind::Secret, [("letter", "a")])
                .with_name_as_prefix(false)];

            let resolution = resolver.resolve(&rules, "spring-k8s").await.unwrap();

            assert_eq!(resolution.sources.len(), 1);
            assert_eq!(resolution.sources[0].prefix, None);
        }

        #[tokio::test]
        async fn test_explicit_prefix_beats_name_prefix() {
            let resolver = SourceResolver::new(labeled_secrets(), name_prefix_options());
            let rules = vec![SourceRule::labeled(SourceKind::Secret, [("letter", "b")])
                .with_explicit_prefix("two")];

            let resolution = resolver.resolve(&rules, "spring-k8s").await.unwrap();

            assert_eq!(resolution.sources[0].prefix.as_deref(), Some("two"));
        }

        #[tokio::test]
        async fn test_label_match_uses_object_name_as_prefix() {
            let resolver = SourceResolver::new(labeled_secrets(), name_prefix_options());
            let rules = vec![SourceRule::labeled(SourceKind::Secret, [("letter", "c")])];

            let resolution = resolver.resolve(&rules, "spring-k8s").await.unwrap();

            assert_eq!(resolution.sources[0].prefix.as_deref(), Some("secret-three"));
        }

        #[tokio::test]
        async fn test_empty_explicit_prefix_is_ignored() {
            let resolver = SourceResolver::new(labeled_secrets(), ResolverOptions::default());
            let rules = vec![SourceRule::named(SourceKind::Secret, "secret-two")
                .with_explicit_prefix("")];

            let resolution = resolver.resolve(&rules, "spring-k8s").await.unwrap();

            assert_eq!(resolution.sources[0].prefix, None);
        }
    }

    mod selection_tests {
        use super::*;

        #[tokio::test]
        async fn test_label_matches_are_ordered_by_name() {
            let cluster = Arc::new(InMemoryCluster::new());
            cluster.put_config_map("ns", "zeta", [("app", "demo")], []);
            cluster.put_config_map("ns", "alpha", [("app", "demo")], []);
            cluster.put_config_map("ns", "mid", [("app", "demo")], []);
            let resolver = SourceResolver::new(cluster, ResolverOptions::default());

            let rules = vec![SourceRule::labeled(SourceKind::ConfigMap, [("app", "demo")])];
            let resolution = resolver.resolve(&rules, "ns").await.unwrap();

            let names: Vec<_> = resolution.sources.iter().map(|s| s.key.name.as_str()).collect();
            assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        }

        #[tokio::test]
        async fn test_rule_declaration_order_is_kept() {
            let cluster = Arc::new(InMemoryCluster::new());
            cluster.put_config_map("ns", "b", [], []);
            cluster.put_config_map("ns", "a", [], []);
            let resolver = SourceResolver::new(cluster, ResolverOptions::default());

            let rules = vec![
                SourceRule::named(SourceKind::ConfigMap, "b"),
                SourceRule::named(SourceKind::ConfigMap, "a"),
            ];
            let resolution = resolver.resolve(&rules, "ns").await.unwrap();

            assert_eq!(resolution.sources[0].key.name, "b");
            assert_eq!(resolution.sources[1].key.name, "a");
        }

        #[tokio::test]
        async fn test_rule_namespace_override() {
            let cluster = Arc::new(InMemoryCluster::new());
            cluster.put_config_map("other", "app", [], []);
            let resolver = SourceResolver::new(cluster, ResolverOptions::default());

            let rules = vec![SourceRule::named(SourceKind::ConfigMap, "app").in_namespace("other")];
            let resolution = resolver.resolve(&rules, "default").await.unwrap();

            assert_eq!(resolution.sources[0].key.namespace, "other");
        }

        #[tokio::test]
        async fn test_profile_sources_follow_base_source() {
            let cluster = Arc::new(InMemoryCluster::new());
            cluster.put_config_map("ns", "app", [], []);
            cluster.put_config_map("ns", "app-dev", [], []);
            let resolver = SourceResolver::new(
                cluster,
                ResolverOptions {
                    use_name_as_prefix: true,
                    profiles: vec!["dev".to_string(), "prod".to_string()],
                    ..ResolverOptions::default()
                },
            );

            let rules = vec![SourceRule::named(SourceKind::ConfigMap, "app")];
            let resolution = resolver.resolve(&rules, "ns").await.unwrap();

            assert_eq!(resolution.sources.len(), 2);
            assert_eq!(resolution.sources[1].key.name, "app-dev");
            assert_eq!(resolution.sources[1].prefix.as_deref(), Some("app"));
        }
    }

    mod failure_tests {
        use super::*;

        #[tokio::test]
        async fn test_missing_named_source_fails_fast() {
            let resolver = SourceResolver::new(labeled_secrets(), ResolverOptions::default());
            let rules = vec![SourceRule::named(SourceKind::Secret, "absent")];

            let err = resolver.resolve(&rules, "spring-k8s").await.unwrap_err();

            assert!(matches!(err, ReloadError::NotFound { ref name, .. } if name == "absent"));
        }

        #[tokio::test]
        async fn test_missing_named_source_skipped_when_lenient() {
            let resolver = SourceResolver::new(
                labeled_secrets(),
                ResolverOptions {
                    fail_fast: false,
                    ..ResolverOptions::default()
                },
            );
            let rules = vec![
                SourceRule::named(SourceKind::Secret, "absent"),
                SourceRule::named(SourceKind::Secret, "secret-two"),
            ];

            let resolution = resolver.resolve(&rules, "spring-k8s").await.unwrap();

            assert_eq!(resolution.sources.len(), 1);
            assert_eq!(resolution.sources[0].key.name, "secret-two");
        }

        #[tokio::test]
        async fn test_empty_selector_policies() {
            let rules = vec![SourceRule::labeled(SourceKind::Secret, [("letter", "z")])];

            let proceed = SourceResolver::new(labeled_secrets(), ResolverOptions::default());
            assert!(proceed.resolve(&rules, "spring-k8s").await.unwrap().sources.is_empty());

            let fail = SourceResolver::new(
                labeled_secrets(),
                ResolverOptions {
                    empty_selector: EmptySelectorPolicy::Fail,
                    ..ResolverOptions::default()
                },
            );
            assert!(matches!(
                fail.resolve(&rules, "spring-k8s").await,
                Err(ReloadError::EmptySelection { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_interest_covers_absent_names_and_selectors() {
        let resolver = SourceResolver::new(
            labeled_secrets(),
            ResolverOptions {
                fail_fast: false,
                profiles: vec!["dev".to_string()],
                ..ResolverOptions::default()
            },
        );
        let rules = vec![
            SourceRule::named(SourceKind::ConfigMap, "app"),
            SourceRule::labeled(SourceKind::Secret, [("letter", "c")]),
        ];
        let resolution = resolver.resolve(&rules, "spring-k8s").await.unwrap();
        let interest = resolver.interest(&rules, "spring-k8s", &resolution);

        let app_dev = SourceKey::new(SourceKind::ConfigMap, "spring-k8s", "app-dev");
        let new_c = SourceKey::new(SourceKind::Secret, "spring-k8s", "secret-new");
        let letter_c = BTreeMap::from([("letter".to_string(), "c".to_string())]);

        assert!(interest.matches(&app_dev, None));
        assert!(interest.matches(&new_c, Some(&letter_c)));
        assert!(!interest.matches(&new_c, None));
    }

    #[test]
    fn test_empty_selector_policy_from_str() {
        assert_eq!("FAIL".parse::<EmptySelectorPolicy>(), Ok(EmptySelectorPolicy::Fail));
        assert_eq!("proceed".parse::<EmptySelectorPolicy>(), Ok(EmptySelectorPolicy::Proceed));
        assert!("maybe".parse::<EmptySelectorPolicy>().is_err());
    }
}

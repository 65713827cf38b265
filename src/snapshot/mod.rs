//! # Snapshot Builder
//!
//! Merges the data of resolved sources into one flat, ordered property set.
//!
//! ## Merge Rules
//!
//! - Sources are merged in resolution order; a later source overwrites an
//!   earlier one on key collision.
//! - Each entry lands at `prefix.key`, or at the bare `key` when the source
//!   has no prefix.
//! - Secret values are Base64-decoded and must be UTF-8.
//! - Entries named `*.properties`, `*.yaml` or `*.yml` are expanded into the
//!   properties they contain (see [`embedded`]).
//!
//! Values stay opaque strings. Building is all-or-nothing: any error discards
//! the partial result.

pub mod embedded;

use crate::error::{ReloadError, Result};
use crate::resolver::Resolution;
use crate::source::{RawSource, ResolvedSource, SourceKey, SourceKind};
use base64::{engine::general_purpose, Engine as _};
use std::collections::BTreeMap;

/// Merged view of every resolved source at one point in time
///
/// Equality of two snapshots, for reload purposes, is equality of
/// `properties`; see [`EffectiveSnapshot::same_properties`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveSnapshot {
    pub properties: BTreeMap<String, String>,
    pub source_versions: BTreeMap<SourceKey, String>,
}

/// Keys that differ between two snapshots. Values are left out so secrets
/// never reach the logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl EffectiveSnapshot {
    /// Build from the sources and raw objects of one resolution pass
    ///
    /// # Errors
    ///
    /// See [`build`].
    pub fn from_resolution(resolution: &Resolution) -> Result<Self> {
        build(&resolution.sources, |key| resolution.fetch(key))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Properties whose key starts with `prefix.`, with that prefix stripped
    pub fn keys_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.properties.iter().filter_map(move |(key, value)| {
            key.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|rest| (rest, value.as_str()))
        })
    }

    /// True when both snapshots bind exactly the same properties.
    /// Resource versions are ignored.
    #[must_use]
    pub fn same_properties(&self, other: &Self) -> bool {
        self.properties == other.properties
    }

    /// Keys added, removed or changed going from `self` to `next`
    #[must_use]
    pub fn diff(&self, next: &Self) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();
        for (key, value) in &next.properties {
            match self.properties.get(key) {
                None => diff.added.push(key.clone()),
                Some(previous) if previous != value => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.removed = self
            .properties
            .keys()
            .filter(|key| !next.properties.contains_key(*key))
            .cloned()
            .collect();
        diff
    }
}

/// Merge `resolved` into a snapshot, reading each source through `fetch`
///
/// # Errors
///
/// - `NotFound` when `fetch` has no object for a resolved key
/// - `Decode` when a Secret value is not Base64 or not UTF-8
/// - `EmbeddedFormat` when an embedded YAML document does not parse or a
///   properties document holds a malformed `\uXXXX` escape
pub fn build<'a, F>(resolved: &[ResolvedSource], fetch: F) -> Result<EffectiveSnapshot>
where
    F: Fn(&SourceKey) -> Option<&'a RawSource>,
{
    let mut snapshot = EffectiveSnapshot::default();

    for source in resolved {
        let raw = fetch(&source.key).ok_or_else(|| ReloadError::NotFound {
            kind: source.key.kind,
            namespace: source.key.namespace.clone(),
            name: source.key.name.clone(),
        })?;

        for (property, value) in &raw.data {
            let value = decode_value(raw, property, value)?;
            match embedded::document_format(property) {
                Some(format) => {
                    let expanded = embedded::expand(format, &value).map_err(|reason| {
                        ReloadError::EmbeddedFormat {
                            source_key: raw.key.clone(),
                            property: property.clone(),
                            reason,
                        }
                    })?;
                    for (key, value) in expanded {
                        snapshot
                            .properties
                            .insert(qualify(source.prefix.as_deref(), &key), value);
                    }
                }
                None => {
                    snapshot
                        .properties
                        .insert(qualify(source.prefix.as_deref(), property), value);
                }
            }
        }

        snapshot
            .source_versions
            .insert(raw.key.clone(), raw.resource_version.clone());
    }

    Ok(snapshot)
}

fn decode_value(raw: &RawSource, property: &str, value: &str) -> Result<String> {
    match raw.key.kind {
        SourceKind::ConfigMap => Ok(value.to_string()),
        SourceKind::Secret => {
            let decode_error = |reason: String| ReloadError::Decode {
                source_key: raw.key.clone(),
                property: property.to_string(),
                reason,
            };
            let bytes = general_purpose::STANDARD
                .decode(value)
                .map_err(|e| decode_error(e.to_string()))?;
            String::from_utf8(bytes).map_err(|e| decode_error(e.to_string()))
        }
    }
}

fn qualify(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{key}"),
        None => key.to_string(),
    }
}

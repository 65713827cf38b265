//! # Typed Binding
//!
//! Binds the properties under a prefix onto a `serde` type.
//!
//! Dotted keys become nested objects and `name[i]` segments become array
//! elements, so `two.property=two` bound at prefix `two` deserialises into
//! `struct Two { property: String }`. Values stay strings; numeric fields
//! need a deserialiser that accepts strings.

use crate::snapshot::EffectiveSnapshot;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Deserialise every property under `prefix` into `T`
///
/// An empty prefix binds the whole snapshot.
///
/// # Errors
///
/// Returns the `serde_json` error when the property tree does not fit `T`.
pub fn bind<T: DeserializeOwned>(
    snapshot: &EffectiveSnapshot,
    prefix: &str,
) -> Result<T, serde_json::Error> {
    serde_json::from_value(tree(snapshot, prefix))
}

/// Property tree under `prefix` as a JSON value
#[must_use]
pub fn tree(snapshot: &EffectiveSnapshot, prefix: &str) -> Value {
    let mut root = Value::Object(Map::new());
    let entries: Box<dyn Iterator<Item = (&str, &str)> + '_> = if prefix.is_empty() {
        Box::new(
            snapshot
                .properties
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )
    } else {
        Box::new(snapshot.keys_with_prefix(prefix))
    };

    for (key, value) in entries {
        let path: Vec<Segment<'_>> = key.split('.').flat_map(parse_segment).collect();
        insert(&mut root, &path, value);
    }
    root
}

/// Indices at or above this bind as plain field names
const MAX_LIST_INDEX: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Field(&'a str),
    Index(usize),
}

/// `hosts[0][1]` -> `Field("hosts"), Index(0), Index(1)`
fn parse_segment(part: &str) -> Vec<Segment<'_>> {
    let Some(open) = part.find('[') else {
        return vec![Segment::Field(part)];
    };
    let mut segments = vec![Segment::Field(&part[..open])];
    let mut rest = &part[open..];
    while let Some(inner) = rest.strip_prefix('[') {
        let Some(close) = inner.find(']') else {
            return vec![Segment::Field(part)];
        };
        match inner[..close].parse::<usize>() {
            Ok(idx) if idx < MAX_LIST_INDEX => segments.push(Segment::Index(idx)),
            _ => return vec![Segment::Field(part)],
        }
        rest = &inner[close + 1..];
    }
    if rest.is_empty() {
        segments
    } else {
        vec![Segment::Field(part)]
    }
}

fn insert(node: &mut Value, path: &[Segment<'_>], value: &str) {
    let Some((head, tail)) = path.split_first() else {
        // A scalar never replaces a subtree that is already populated
        if (!node.is_object() && !node.is_array()) || is_empty_container(node) {
            *node = Value::String(value.to_string());
        }
        return;
    };

    match head {
        Segment::Field(name) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry((*name).to_string()).or_insert(Value::Null);
                insert(child, tail, value);
            }
        }
        Segment::Index(idx) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(items) = node {
                let Some(len) = idx.checked_add(1) else {
                    return;
                };
                if items.len() < len {
                    items.resize(len, Value::Null);
                }
                if let Some(item) = items.get_mut(*idx) {
                    insert(item, tail, value);
                }
            }
        }
    }
}

fn is_empty_container(node: &Value) -> bool {
    match node {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    fn snapshot(pairs: &[(&str, &str)]) -> EffectiveSnapshot {
        EffectiveSnapshot {
            properties: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            source_versions: BTreeMap::new(),
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Two {
        property: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Server {
        hosts: Vec<String>,
        tls: Tls,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Tls {
        enabled: String,
    }

    #[test]
    fn test_bind_prefix_into_struct() {
        let snap = snapshot(&[("two.property", "two"), ("one.property", "one")]);
        let two: Two = bind(&snap, "two").unwrap();
        assert_eq!(two, Two { property: "two".to_string() });
    }

    #[test]
    fn test_bind_nested_and_indexed_keys() {
        let snap = snapshot(&[
            ("server.hosts[0]", "a"),
            ("server.hosts[1]", "b"),
            ("server.tls.enabled", "true"),
        ]);
        let server: Server = bind(&snap, "server").unwrap();
        assert_eq!(server.hosts, vec!["a", "b"]);
        assert_eq!(server.tls.enabled, "true");
    }

    #[test]
    fn test_bind_into_map_with_empty_prefix() {
        let snap = snapshot(&[("flat", "1")]);
        let all: BTreeMap<String, String> = bind(&snap, "").unwrap();
        assert_eq!(all.get("flat"), Some(&"1".to_string()));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let snap = snapshot(&[("other.property", "x")]);
        assert!(bind::<Two>(&snap, "two").is_err());
    }

    #[test]
    fn test_parse_segment() {
        assert_eq!(parse_segment("plain"), vec![Segment::Field("plain")]);
        assert_eq!(
            parse_segment("hosts[0][2]"),
            vec![Segment::Field("hosts"), Segment::Index(0), Segment::Index(2)]
        );
        assert_eq!(parse_segment("odd[x]"), vec![Segment::Field("odd[x]")]);
    }

    #[test]
    fn test_huge_index_binds_as_field_name() {
        let snap = snapshot(&[
            ("list[18446744073709551615]", "overflow"),
            ("list[100000000000]", "huge"),
            ("ok[1]", "b"),
        ]);
        let value = tree(&snap, "");
        assert_eq!(value["list[18446744073709551615]"], "overflow");
        assert_eq!(value["list[100000000000]"], "huge");
        assert_eq!(value["ok"][1], "b");
        assert_eq!(
            parse_segment("list[1024]"),
            vec![Segment::Field("list[1024]")]
        );
    }

    #[test]
    fn test_subtree_wins_over_scalar() {
        let snap = snapshot(&[("a", "scalar"), ("a.b", "nested")]);
        let value = tree(&snap, "");
        assert_eq!(value["a"]["b"], "nested");
    }
}

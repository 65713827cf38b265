//! # Embedded Documents
//!
//! A source entry whose key ends in `.properties`, `.yaml` or `.yml` holds a
//! whole property document (typically `application.properties`). Its
//! contents are expanded into individual properties instead of being bound
//! as one opaque value.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Document format recognised from an entry key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Properties,
    Yaml,
}

/// Detect an embedded document by its entry key
#[must_use]
pub fn document_format(entry_key: &str) -> Option<DocumentFormat> {
    if entry_key.ends_with(".properties") {
        Some(DocumentFormat::Properties)
    } else if entry_key.ends_with(".yaml") || entry_key.ends_with(".yml") {
        Some(DocumentFormat::Yaml)
    } else {
        None
    }
}

/// Expand a document into flat properties
///
/// # Errors
///
/// Returns the parser message when a YAML document is malformed or a
/// properties document holds a malformed `\uXXXX` escape.
pub fn expand(
    format: DocumentFormat,
    content: &str,
) -> Result<BTreeMap<String, String>, String> {
    match format {
        DocumentFormat::Properties => parse_properties(content),
        DocumentFormat::Yaml => parse_yaml(content),
    }
}

/// Parse Java-style properties
///
/// - `#`/`!` start a comment line
/// - key and value are split on the first unescaped `=`, `:` or whitespace
/// - a line ending in an odd number of backslashes joins the next line
/// - `\n`, `\t`, `\r`, `\f` and `\uXXXX` are unescaped; any other escaped
///   character stands for itself
fn parse_properties(content: &str) -> Result<BTreeMap<String, String>, String> {
    let mut properties = BTreeMap::new();
    let mut logical = String::new();
    let mut continuing = false;

    for line in content.lines() {
        let line = line.trim_start_matches(is_properties_space);
        if !continuing && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }

        if ends_with_continuation(line) {
            logical.push_str(&line[..line.len() - 1]);
            continuing = true;
            continue;
        }
        logical.push_str(line);
        continuing = false;

        insert_entry(&std::mem::take(&mut logical), &mut properties)?;
    }
    if continuing {
        insert_entry(&logical, &mut properties)?;
    }

    Ok(properties)
}

fn insert_entry(entry: &str, properties: &mut BTreeMap<String, String>) -> Result<(), String> {
    let (raw_key, raw_value) = split_entry(entry);
    let key = unescape(raw_key)?;
    if !key.is_empty() {
        properties.insert(key, unescape(raw_value)?);
    }
    Ok(())
}

fn is_properties_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

/// Only an odd run of trailing backslashes escapes the line break
fn ends_with_continuation(line: &str) -> bool {
    line.bytes().rev().take_while(|b| *b == b'\\').count() % 2 == 1
}

/// Split on the first unescaped separator; the value skips surrounding
/// whitespace and at most one `=` or `:`
fn split_entry(entry: &str) -> (&str, &str) {
    let bytes = entry.as_bytes();
    let mut idx = 0;
    let mut key_end = bytes.len();
    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' => idx += 2,
            b'=' | b':' | b' ' | b'\t' | b'\x0c' => {
                key_end = idx;
                break;
            }
            _ => idx += 1,
        }
    }

    let rest = entry[key_end..].trim_start_matches(is_properties_space);
    let rest = rest
        .strip_prefix(['=', ':'])
        .unwrap_or(rest)
        .trim_start_matches(is_properties_space);
    (&entry[..key_end], rest)
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let unit = read_code_unit(&mut chars)?;
                out.push(decode_code_unit(unit, &mut chars)?);
            }
            Some(other) => out.push(other),
            // A trailing lone backslash is dropped
            None => {}
        }
    }
    Ok(out)
}

/// Four hex digits following `\u`
fn read_code_unit(chars: &mut std::str::Chars<'_>) -> Result<u16, String> {
    let hex: String = chars.by_ref().take(4).collect();
    if hex.len() != 4 {
        return Err(format!("malformed \\uxxxx escape: \\u{hex}"));
    }
    u16::from_str_radix(&hex, 16).map_err(|e| format!("malformed \\uxxxx escape \\u{hex}: {e}"))
}

/// Combine a UTF-16 surrogate pair when `unit` is a high surrogate
fn decode_code_unit(unit: u16, chars: &mut std::str::Chars<'_>) -> Result<char, String> {
    if !(0xD800..0xDC00).contains(&unit) {
        return Ok(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    let mut lookahead = chars.clone();
    if lookahead.next() == Some('\\') && lookahead.next() == Some('u') {
        let low = read_code_unit(&mut lookahead)?;
        if (0xDC00..0xE000).contains(&low) {
            *chars = lookahead;
            return Ok(char::decode_utf16([unit, low])
                .next()
                .and_then(Result::ok)
                .unwrap_or(char::REPLACEMENT_CHARACTER));
        }
    }
    Ok(char::REPLACEMENT_CHARACTER)
}

/// Parse one or more YAML documents; later documents override earlier ones
fn parse_yaml(content: &str) -> Result<BTreeMap<String, String>, String> {
    let mut properties = BTreeMap::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| e.to_string())?;
        flatten_yaml_value(&value, String::new(), &mut properties);
    }
    Ok(properties)
}

fn flatten_yaml_value(
    value: &serde_yaml::Value,
    prefix: String,
    result: &mut BTreeMap<String, String>,
) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, val) in map {
                let key_str = match key {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                let new_prefix = if prefix.is_empty() {
                    key_str
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml_value(val, new_prefix, result);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for (idx, val) in seq.iter().enumerate() {
                flatten_yaml_value(val, format!("{prefix}[{idx}]"), result);
            }
        }
        serde_yaml::Value::String(s) => {
            result.insert(prefix, s.clone());
        }
        serde_yaml::Value::Number(n) => {
            result.insert(prefix, n.to_string());
        }
        serde_yaml::Value::Bool(b) => {
            result.insert(prefix, b.to_string());
        }
        serde_yaml::Value::Null => {
            // An empty document flattens to nothing
            if !prefix.is_empty() {
                result.insert(prefix, String::new());
            }
        }
        serde_yaml::Value::Tagged(tagged) => {
            flatten_yaml_value(&tagged.value, prefix, result);
        }
    }
}

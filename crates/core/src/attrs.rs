//! Hierarchical attribute store
//!
//! Configuration input arrives as a tree of typed values addressed by
//! dotted paths (e.g. `endpoints.mq.port`). The store is built from
//! explicit overrides and then filled with defaults via [`AttributeStore::merge`],
//! which never overwrites a value that was set explicitly. Within one
//! resolution pass, later `set` calls at the same path win.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A typed attribute value: scalar, list, or nested map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Returns the string content if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret this value as a TCP port.
    ///
    /// Accepts an integer in range or a string that parses to one; the
    /// original attribute surface carries ports as strings (`"5672"`).
    pub fn as_port(&self) -> Option<u16> {
        match self {
            AttrValue::Integer(i) => u16::try_from(*i).ok(),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Truthiness for toggle attributes (`mq.cluster`, `use_ssl`).
    ///
    /// True for `true`, nonzero integers, and the strings
    /// "true"/"yes"/"1" (case-insensitive). Everything else is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            AttrValue::Bool(b) => *b,
            AttrValue::Integer(i) => *i != 0,
            AttrValue::String(s) => {
                matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1")
            }
            AttrValue::List(_) | AttrValue::Map(_) => false,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Integer(i)
    }
}

/// A snapshot of hierarchical configuration attributes.
///
/// Paths are dotted segment sequences; each path maps to exactly one
/// value. The store is mutated only while inputs are assembled and is
/// treated as read-only once resolution starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeStore {
    root: BTreeMap<String, AttrValue>,
}

impl AttributeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a store from a JSON object string.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let root: BTreeMap<String, AttrValue> = serde_json::from_str(json)?;
        Ok(Self { root })
    }

    /// Load a store from a JSON attributes file.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, CoreError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Look up the value at a dotted path, if present.
    pub fn get(&self, path: &str) -> Option<&AttrValue> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.root.get(first)?;

        for segment in segments {
            match current {
                AttrValue::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }

        Some(current)
    }

    /// Convenience accessor for string-valued attributes.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(AttrValue::as_str)
    }

    /// Returns true if the attribute at `path` exists and is truthy.
    pub fn is_truthy(&self, path: &str) -> bool {
        self.get(path).is_some_and(AttrValue::is_truthy)
    }

    /// Write a value at a dotted path, overwriting any previous value.
    ///
    /// Intermediate maps are created as needed. Fails with
    /// [`CoreError::PathConflict`] if an intermediate segment already
    /// holds a non-map value (e.g. setting `a.b.c` when `a.b` is a
    /// scalar).
    pub fn set(&mut self, path: &str, value: impl Into<AttrValue>) -> Result<(), CoreError> {
        let segments: Vec<&str> = path.split('.').collect();
        // `"".split('.')` still yields one (empty) segment.
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CoreError::invalid(format!(
                "attribute path '{path}' has an empty segment"
            )));
        }
        let (last, intermediate) = segments
            .split_last()
            .ok_or_else(|| CoreError::invalid("empty attribute path"))?;

        let mut current = &mut self.root;
        for (i, segment) in intermediate.iter().enumerate() {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| AttrValue::Map(BTreeMap::new()));
            match entry {
                AttrValue::Map(map) => current = map,
                _ => {
                    return Err(CoreError::PathConflict {
                        path: segments[..=i].join("."),
                    });
                }
            }
        }

        current.insert(last.to_string(), value.into());
        Ok(())
    }

    /// Fill unset paths from a defaults layer.
    ///
    /// Values already present in `self` are never overwritten. Maps are
    /// merged recursively; where the default is a map but the explicit
    /// value is a scalar (or vice versa), the explicit value wins.
    pub fn merge(&mut self, defaults: &AttributeStore) {
        merge_maps(&mut self.root, &defaults.root);
    }

    /// All leaf paths currently set in the store, in sorted order.
    ///
    /// Lists count as leaves. Used to warn about unrecognized input.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_leaves(&self.root, String::new(), &mut paths);
        paths
    }

    /// Returns true if no attributes are set.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

fn merge_maps(target: &mut BTreeMap<String, AttrValue>, defaults: &BTreeMap<String, AttrValue>) {
    for (key, default_value) in defaults {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), default_value.clone());
            }
            Some(AttrValue::Map(existing)) => {
                if let AttrValue::Map(default_map) = default_value {
                    merge_maps(existing, default_map);
                }
            }
            Some(_) => {} // explicit value wins
        }
    }
}

fn collect_leaves(map: &BTreeMap<String, AttrValue>, prefix: String, out: &mut Vec<String>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            AttrValue::Map(inner) => collect_leaves(inner, path, out),
            _ => out.push(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_nested_path() {
        let mut store = AttributeStore::new();
        store.set("endpoints.mq.port", "5672").unwrap();

        assert_eq!(store.get_str("endpoints.mq.port"), Some("5672"));
        assert!(store.get("endpoints.mq.missing").is_none());
        assert!(store.get("nothing").is_none());
    }

    #[test]
    fn later_set_overwrites_earlier() {
        let mut store = AttributeStore::new();
        store.set("mq.user", "guest").unwrap();
        store.set("mq.user", "foo").unwrap();

        assert_eq!(store.get_str("mq.user"), Some("foo"));
    }

    #[test]
    fn set_through_scalar_is_path_conflict() {
        let mut store = AttributeStore::new();
        store.set("a.b", "leaf").unwrap();

        let err = store.set("a.b.c", "deeper").unwrap_err();
        match err {
            CoreError::PathConflict { path } => assert_eq!(path, "a.b"),
            other => panic!("expected PathConflict, got {other:?}"),
        }
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut store = AttributeStore::new();

        assert!(store.set("", "value").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn empty_segment_is_rejected() {
        let mut store = AttributeStore::new();

        assert!(store.set("mq..user", "foo").is_err());
        assert!(store.set(".mq", "foo").is_err());
        assert!(store.set("mq.", "foo").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn merge_fills_only_unset_paths() {
        let mut store = AttributeStore::new();
        store.set("mq.user", "foo").unwrap();

        let mut defaults = AttributeStore::new();
        defaults.set("mq.user", "guest").unwrap();
        defaults.set("mq.vhost", "/").unwrap();

        store.merge(&defaults);

        assert_eq!(store.get_str("mq.user"), Some("foo"));
        assert_eq!(store.get_str("mq.vhost"), Some("/"));
    }

    #[test]
    fn merge_keeps_explicit_scalar_over_default_map() {
        let mut store = AttributeStore::new();
        store.set("mq", "scalar").unwrap();

        let mut defaults = AttributeStore::new();
        defaults.set("mq.vhost", "/").unwrap();

        store.merge(&defaults);

        assert_eq!(store.get_str("mq"), Some("scalar"));
        assert!(store.get("mq.vhost").is_none());
    }

    #[test]
    fn truthiness() {
        assert!(AttrValue::Bool(true).is_truthy());
        assert!(AttrValue::Integer(1).is_truthy());
        assert!(AttrValue::from("true").is_truthy());
        assert!(AttrValue::from("YES").is_truthy());

        assert!(!AttrValue::Bool(false).is_truthy());
        assert!(!AttrValue::Integer(0).is_truthy());
        assert!(!AttrValue::from("false").is_truthy());
        assert!(!AttrValue::from("anything").is_truthy());
        assert!(!AttrValue::List(vec![]).is_truthy());
    }

    #[test]
    fn port_from_string_and_integer() {
        assert_eq!(AttrValue::from("4242").as_port(), Some(4242));
        assert_eq!(AttrValue::Integer(5672).as_port(), Some(5672));
        assert_eq!(AttrValue::from("not-a-port").as_port(), None);
        assert_eq!(AttrValue::Integer(70000).as_port(), None);
    }

    #[test]
    fn from_json_str_parses_nested_object() {
        let store = AttributeStore::from_json_str(
            r#"{
                "endpoints": { "mq": { "port": "4242", "bind_interface": "eth0" } },
                "mq": { "cluster": true, "cluster_disk_nodes": ["host2", "host1"] }
            }"#,
        )
        .unwrap();

        assert_eq!(store.get_str("endpoints.mq.port"), Some("4242"));
        assert!(store.is_truthy("mq.cluster"));
        match store.get("mq.cluster_disk_nodes") {
            Some(AttrValue::List(items)) => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn from_json_str_rejects_non_object() {
        assert!(AttributeStore::from_json_str("[1, 2, 3]").is_err());
        assert!(AttributeStore::from_json_str("not json").is_err());
    }

    #[test]
    fn leaf_paths_are_sorted_and_dotted() {
        let mut store = AttributeStore::new();
        store.set("mq.user", "foo").unwrap();
        store.set("mq.cluster", true).unwrap();
        store.set("endpoints.mq.port", "5672").unwrap();

        assert_eq!(
            store.leaf_paths(),
            vec!["endpoints.mq.port", "mq.cluster", "mq.user"]
        );
    }
}

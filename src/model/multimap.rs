//! Case-insensitive string multimap used for headers and query parameters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Maps a case-insensitive key to the ordered list of values it was given.
///
/// Keys are stored lowercased; values keep their original case and order of
/// insertion. Serialises as a plain JSON object of string arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiMap {
    entries: HashMap<String, Vec<String>>,
}

impl MultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs, preserving value order per key.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut map = Self::new();
        for (k, v) in pairs {
            map.insert(k.as_ref(), v);
        }
        map
    }

    /// Append a value under `key`. Existing values for the key are kept.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// All values for `key`, in insertion order. Empty slice when absent.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First value for `key`, if any.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// `true` if any value under `key` equals `value` (values compare
    /// case-sensitively).
    pub fn contains_value(&self, key: &str, value: &str) -> bool {
        self.get_all(key).iter().any(|v| v == value)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(lowercased key, values)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut m = MultiMap::new();
        m.insert("Content-Type", "application/json");
        assert!(m.contains_key("content-type"));
        assert!(m.contains_key("CONTENT-TYPE"));
        assert_eq!(m.first("Content-type"), Some("application/json"));
    }

    #[test]
    fn values_keep_case_and_order() {
        let mut m = MultiMap::new();
        m.insert("Accept", "Text/Html");
        m.insert("ACCEPT", "application/json");
        assert_eq!(m.get_all("accept"), &["Text/Html", "application/json"]);
    }

    #[test]
    fn contains_value_is_case_sensitive_on_values() {
        let mut m = MultiMap::new();
        m.insert("X-Token", "Secret");
        assert!(m.contains_value("x-token", "Secret"));
        assert!(!m.contains_value("x-token", "secret"));
    }

    #[test]
    fn missing_key_yields_empty_slice() {
        let m = MultiMap::new();
        assert!(m.get_all("nope").is_empty());
        assert!(m.first("nope").is_none());
        assert!(!m.contains_key("nope"));
    }

    #[test]
    fn from_pairs_collects_duplicates() {
        let m = MultiMap::from_pairs([("tag", "a"), ("TAG", "b"), ("other", "c")]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get_all("tag"), &["a", "b"]);
    }

    #[test]
    fn serialises_as_plain_object() {
        let m = MultiMap::from_pairs([("K", "v")]);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"k":["v"]}"#);
        let back: MultiMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}

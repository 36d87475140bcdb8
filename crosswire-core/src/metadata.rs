//! Ordered, case-insensitive RPC metadata.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use http::HeaderMap;
use indexmap::IndexMap;

/// An ordered multimap of RPC metadata.
///
/// Keys are stored lowercase and looked up case-insensitively. Iteration
/// over distinct keys follows insertion order. Keys ending in `-bin` carry
/// raw bytes transmitted as unpadded base64; callers store and retrieve the
/// base64 form through the regular accessors and use
/// [`append_binary`](Metadata::append_binary) /
/// [`binary_values`](Metadata::binary_values) for the decoded form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: IndexMap<String, Vec<String>>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key to a single value, replacing any existing values.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    /// Append a value to a key, preserving existing values.
    pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Append raw bytes to a `-bin` key as unpadded base64.
    pub fn append_binary(&mut self, key: impl AsRef<str>, value: &[u8]) {
        self.append(key, STANDARD_NO_PAD.encode(value));
    }

    /// Get the first value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Get all values for a key.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Decode all values for a `-bin` key from base64.
    ///
    /// Values that are not valid base64 (padded or unpadded) are skipped.
    pub fn binary_values(&self, key: &str) -> Vec<Vec<u8>> {
        self.get_all(key)
            .iter()
            .filter_map(|value| decode_base64(value))
            .collect()
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Remove a key, returning its values.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.shift_remove(&key.to_ascii_lowercase())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Merge another metadata map into this one, appending values.
    pub fn extend(&mut self, other: Metadata) {
        for (key, values) in other.entries {
            self.entries.entry(key).or_default().extend(values);
        }
    }

    /// Build metadata from an `http::HeaderMap`.
    ///
    /// Values that are not valid UTF-8 are skipped; header names are
    /// already lowercase in `HeaderMap`.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut metadata = Metadata::new();
        for (name, value) in headers.iter() {
            if let Ok(value) = value.to_str() {
                metadata.append(name.as_str(), value);
            }
        }
        metadata
    }

    /// Render this metadata as an `http::HeaderMap`.
    ///
    /// Entries whose key or value is not a valid header are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (key, values) in self.iter() {
            let Ok(name) = http::header::HeaderName::try_from(key) else {
                continue;
            };
            for value in values {
                if let Ok(value) = http::header::HeaderValue::try_from(value.as_str()) {
                    headers.append(name.clone(), value);
                }
            }
        }
        headers
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.append(key.into(), value.into());
        }
        metadata
    }
}

/// Decode base64 accepting both unpadded (canonical) and padded forms.
fn decode_base64(value: &str) -> Option<Vec<u8>> {
    STANDARD_NO_PAD
        .decode(value)
        .or_else(|_| STANDARD.decode(value))
        .ok()
}

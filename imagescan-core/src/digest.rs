//! Image reference to digest mapping
use std::collections::HashMap;

/// Resolved digests, keyed by image reference as written in the container spec.
///
/// Only references whose digest was actually resolved have an entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigestMapping(HashMap<String, String>);

impl DigestMapping {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the digest of `image`, replacing any earlier entry.
    pub fn insert(&mut self, image: impl Into<String>, digest: impl Into<String>) {
        self.0.insert(image.into(), digest.into());
    }

    /// The digest resolved for `image`.
    pub fn get(&self, image: &str) -> Option<&str> {
        self.0.get(image).map(String::as_str)
    }

    /// Number of distinct references with a digest.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no digest was resolved.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DigestMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Hierarchical cache key made of filesystem-safe path segments.
///
/// Keys must be derived only from semantic inputs (tile coordinates,
/// sequence ids, country and region codes) so that separate runs agree on
/// them. Segments are percent-encoded, so distinct inputs never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// The empty key, used as a prefix matching everything.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(segments.into_iter().map(|s| encode(s.as_ref())).collect())
    }

    /// Rebuilds a key from segments that are already encoded, as found on disk.
    pub(crate) fn from_encoded(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parses a `/`-separated key of raw segments.
    pub fn parse(s: &str) -> Self {
        Self::from_segments(s.split('/').filter(|p| !p.is_empty()))
    }

    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        let mut segments = self.0.clone();
        segments.push(encode(segment.as_ref()));
        Self(segments)
    }

    /// Encoded segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub(crate) fn to_dir(&self, base: &Path) -> PathBuf {
        self.0.iter().fold(base.to_path_buf(), |p, s| p.join(s))
    }

    pub(crate) fn to_path(&self, base: &Path, extension: &str) -> PathBuf {
        match self.0.split_last() {
            Some((last, parents)) => parents
                .iter()
                .fold(base.to_path_buf(), |p, s| p.join(s))
                .join(format!("{last}.{extension}")),
            None => base.join(format!("%.{extension}")),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Percent-encodes every byte outside `[A-Za-z0-9._-]`, plus a leading `.`
/// (reserved for temp files). The empty segment becomes `%`, which no
/// non-empty input can produce.
fn encode(segment: &str) -> String {
    if segment.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(segment.len());
    for (i, b) in segment.bytes().enumerate() {
        let safe = b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && i > 0);
        if safe {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let key = CacheKey::parse("US/US-CA/14-2800-6500");
        assert_eq!(key.segments().len(), 3);
        assert_eq!(key.to_string(), "US/US-CA/14-2800-6500");
    }

    #[test]
    fn test_encode_path_traversal() {
        let key = CacheKey::from_segments(["..", "a/b", ".hidden", ""]);
        assert_eq!(key.segments(), &["%2E.", "a%2Fb", "%2Ehidden", "%"]);
        assert!(key.segments().iter().all(|s| !s.starts_with('.') && !s.contains('/')));
    }

    #[test]
    fn test_distinct_ids_get_distinct_keys() {
        let ids = ["a/b", "a_b", "a%2Fb", "a b", "a_b_", "", "%", "ä", "_"];
        let keys: std::collections::HashSet<CacheKey> =
            ids.iter().map(|id| CacheKey::from_segments([id])).collect();
        assert_eq!(keys.len(), ids.len());
    }

    #[test]
    fn test_to_path() {
        let key = CacheKey::parse("14-1-2/abc");
        let path = key.to_path(Path::new("/c/matches"), "json.gz");
        assert_eq!(path, PathBuf::from("/c/matches/14-1-2/abc.json.gz"));
    }

    #[test]
    fn test_child() {
        let key = CacheKey::parse("14-1-2").child("seq 1");
        assert_eq!(key.to_string(), "14-1-2/seq%201");
    }

    #[test]
    fn test_serializes_encoded_segments() {
        let key = CacheKey::from_segments(["DE", "DE-BE", "a/b"]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"["DE","DE-BE","a%2Fb"]"#);
        let back: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}

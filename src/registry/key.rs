//! Path keys
//!
//! Inputs are looked up by the HTTP path clients request. Leading and
//! trailing separators are not significant, so `/live/a`, `live/a/` and
//! `live/a` all name the same input.

/// Separator-trimmed request path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(String);

impl PathKey {
    /// Create a key from a raw path
    pub fn new(path: &str) -> Self {
        Self(path.trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PathKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for PathKey {
    fn from(path: String) -> Self {
        Self::new(&path)
    }
}

impl std::fmt::Display for PathKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0)
    }
}

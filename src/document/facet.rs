use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaViolation;

/// Hierarchical facet path such as `/electronics/phones/android`.
///
/// Always starts with `/` and has at least one segment; segments are
/// non-empty and cannot contain `/`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Facet(String);

impl Facet {
    pub fn from_path(path: &str) -> Result<Facet, SchemaViolation> {
        let invalid = || SchemaViolation::InvalidFacetPath(path.to_string());
        let rest = path.strip_prefix('/').ok_or_else(invalid)?;
        if rest.is_empty() || rest.split('/').any(str::is_empty) {
            return Err(invalid());
        }
        Ok(Facet(path.to_string()))
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Facet, SchemaViolation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = String::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.contains('/') {
                return Err(SchemaViolation::InvalidFacetPath(format!("{}/{}", path, segment)));
            }
            path.push('/');
            path.push_str(segment);
        }
        Facet::from_path(&path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..].split('/')
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The path itself and every ancestor, shortest first
    pub fn prefixes(&self) -> Vec<Facet> {
        let mut prefixes = Vec::with_capacity(self.depth());
        for (idx, ch) in self.0.char_indices().skip(1) {
            if ch == '/' {
                prefixes.push(Facet(self.0[..idx].to_string()));
            }
        }
        prefixes.push(self.clone());
        prefixes
    }

    /// Whether `other` equals this path or lies underneath it
    pub fn is_prefix_of(&self, other: &Facet) -> bool {
        other.0 == self.0
            || (other.0.starts_with(&self.0) && other.0.as_bytes()[self.0.len()] == b'/')
    }

    pub fn parent(&self) -> Option<Facet> {
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            None
        } else {
            Some(Facet(self.0[..idx].to_string()))
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Facet {
    type Error = SchemaViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Facet::from_path(&value)
    }
}

impl From<Facet> for String {
    fn from(facet: Facet) -> String {
        facet.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        let facet = Facet::from_path("/a/b/c").unwrap();
        assert_eq!(facet.segments().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(facet.depth(), 3);
        assert_eq!(Facet::from_segments(["a", "b"]).unwrap().as_str(), "/a/b");
    }

    #[test]
    fn test_invalid_paths() {
        for path in ["", "/", "a/b", "/a//b", "/a/", "//"] {
            assert!(Facet::from_path(path).is_err(), "{} should be rejected", path);
        }
        assert!(Facet::from_segments(["a/b"]).is_err());
        assert!(Facet::from_segments(Vec::<&str>::new()).is_err());
    }

    #[test]
    fn test_prefixes() {
        let facet = Facet::from_path("/a/b/c").unwrap();
        let prefixes: Vec<String> = facet.prefixes().into_iter().map(String::from).collect();
        assert_eq!(prefixes, vec!["/a", "/a/b", "/a/b/c"]);
    }

    #[test]
    fn test_is_prefix_of() {
        let ab = Facet::from_path("/a/b").unwrap();
        assert!(ab.is_prefix_of(&Facet::from_path("/a/b").unwrap()));
        assert!(ab.is_prefix_of(&Facet::from_path("/a/b/c").unwrap()));
        assert!(!ab.is_prefix_of(&Facet::from_path("/a/bc").unwrap()));
        assert!(!ab.is_prefix_of(&Facet::from_path("/a").unwrap()));
        assert_eq!(ab.parent().unwrap().as_str(), "/a");
        assert!(Facet::from_path("/a").unwrap().parent().is_none());
    }
}

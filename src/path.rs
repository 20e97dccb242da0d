//! Absolute virtual path handling, adapted from the segment-walking style of
//! `tlfs-crdt`'s `Path`/`PathBuf` (`crdt/src/path.rs`) but over UTF-8
//! component strings rather than CRDT key segments.

use crate::error::{NexusError, Result};

/// A normalised absolute path: starts with `/`, no `.`/`..` components, no
/// trailing slash except for the root itself.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(NexusError::Usage(format!("path must be absolute: {raw}")));
        }
        let mut components: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if components.pop().is_none() {
                        return Err(NexusError::Usage(format!("path escapes root: {raw}")));
                    }
                }
                seg => components.push(seg),
            }
        }
        if components.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(format!("/{}", components.join("/"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn components(&self) -> Vec<&str> {
        if self.is_root() {
            vec![]
        } else {
            self.0[1..].split('/').collect()
        }
    }

    pub fn parent(&self) -> Option<NormalizedPath> {
        if self.is_root() {
            return None;
        }
        let comps = self.components();
        if comps.len() == 1 {
            Some(Self::root())
        } else {
            Some(Self(format!("/{}", comps[..comps.len() - 1].join("/"))))
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.components().last().copied()
    }

    pub fn join(&self, child: &str) -> Result<NormalizedPath> {
        if self.is_root() {
            Self::parse(&format!("/{child}"))
        } else {
            Self::parse(&format!("{}/{child}", self.0))
        }
    }

    pub fn is_ancestor_of(&self, other: &NormalizedPath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }

    /// Ancestors from nearest to root, including self.
    pub fn ancestors_inclusive(&self) -> Vec<NormalizedPath> {
        let mut out = vec![self.clone()];
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            out.push(parent.clone());
            current = parent;
        }
        out
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_dot_and_double_dot() {
        assert_eq!(NormalizedPath::parse("/a/./b/../c").unwrap().as_str(), "/a/c");
    }

    #[test]
    fn rejects_relative_paths() {
        assert!(NormalizedPath::parse("a/b").is_err());
    }

    #[test]
    fn rejects_escaping_root() {
        assert!(NormalizedPath::parse("/..").is_err());
    }

    #[test]
    fn ancestor_check() {
        let root = NormalizedPath::root();
        let deep = NormalizedPath::parse("/a/b/c").unwrap();
        assert!(root.is_ancestor_of(&deep));
        let a = NormalizedPath::parse("/a").unwrap();
        assert!(a.is_ancestor_of(&deep));
        let ab = NormalizedPath::parse("/a/b").unwrap();
        assert!(ab.is_ancestor_of(&deep));
        let other = NormalizedPath::parse("/x").unwrap();
        assert!(!other.is_ancestor_of(&deep));
    }

    #[test]
    fn ancestors_inclusive_walks_to_root() {
        let p = NormalizedPath::parse("/a/b").unwrap();
        let ancestors: Vec<String> = p.ancestors_inclusive().iter().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, vec!["/a/b".to_string(), "/a".to_string(), "/".to_string()]);
    }
}

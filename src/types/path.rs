//! Normalized repository paths.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A normalized absolute repository path.
///
/// Two values are distinguished beyond ordinary paths: the root (`/`) and the
/// repository level, which has no path at all and renders as `:repository`
/// in repo-init output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoPath {
    segments: Vec<String>,
    repository: bool,
}

impl RepoPath {
    /// Build a path from a string, collapsing duplicate and trailing slashes.
    pub fn new(raw: &str) -> Self {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        RepoPath {
            segments,
            repository: false,
        }
    }

    /// The root path, `/`.
    pub fn root() -> Self {
        RepoPath {
            segments: Vec::new(),
            repository: false,
        }
    }

    /// The repository-level pseudo path (`:repository` in repo-init output).
    pub fn repository() -> Self {
        RepoPath {
            segments: Vec::new(),
            repository: true,
        }
    }

    pub fn is_root(&self) -> bool {
        !self.repository && self.segments.is_empty()
    }

    pub fn is_repository(&self) -> bool {
        self.repository
    }

    /// The parent path; `None` for the root and the repository level.
    pub fn parent(&self) -> Option<RepoPath> {
        if self.repository || self.segments.is_empty() {
            return None;
        }
        Some(RepoPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
            repository: false,
        })
    }

    /// Append one child segment.
    pub fn join(&self, name: &str) -> RepoPath {
        let mut segments = self.segments.clone();
        segments.extend(name.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        RepoPath {
            segments,
            repository: false,
        }
    }

    /// Segment-wise prefix containment, inclusive of equality.
    ///
    /// `/a/bc` is not contained in `/a/b`; the repository level contains
    /// nothing and is contained in nothing.
    pub fn starts_with(&self, prefix: &RepoPath) -> bool {
        if self.repository || prefix.repository {
            return false;
        }
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// The segments remaining after `prefix`, when `self` starts with it.
    pub fn strip_prefix(&self, prefix: &RepoPath) -> Option<&[String]> {
        if self.starts_with(prefix) {
            Some(&self.segments[prefix.segments.len()..])
        } else {
            None
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl Display for RepoPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.repository {
            return write!(f, ":repository");
        }
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for RepoPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ":repository" {
            Ok(RepoPath::repository())
        } else {
            Ok(RepoPath::new(s))
        }
    }
}

impl From<&str> for RepoPath {
    fn from(s: &str) -> Self {
        RepoPath::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        plain = { "/content/x", "/content/x" },
        trailing_slash = { "/content/x/", "/content/x" },
        duplicate_slashes = { "//content///x", "/content/x" },
        relative_input = { "content/x", "/content/x" },
        root = { "/", "/" },
        empty = { "", "/" },
    )]
    fn test_normalization(raw: &str, expected: &str) {
        assert_eq!(RepoPath::new(raw).to_string(), expected);
    }

    #[test]
    fn test_parent() {
        let path = RepoPath::new("/home/users/system/svc-a");
        assert_eq!(path.parent().unwrap().to_string(), "/home/users/system");
        assert_eq!(RepoPath::new("/a").parent().unwrap(), RepoPath::root());
        assert!(RepoPath::root().parent().is_none());
        assert!(RepoPath::repository().parent().is_none());
    }

    #[test]
    fn test_join() {
        let base = RepoPath::new("/home/users");
        assert_eq!(base.join("system").to_string(), "/home/users/system");
        assert_eq!(base.join("a/b").to_string(), "/home/users/a/b");
    }

    #[parameterized(
        equal = { "/a/b", "/a/b", true },
        child = { "/a/b/c", "/a/b", true },
        sibling = { "/a/bc", "/a/b", false },
        reversed = { "/a", "/a/b", false },
        under_root = { "/a/b", "/", true },
    )]
    fn test_starts_with(path: &str, prefix: &str, expected: bool) {
        assert_eq!(
            RepoPath::new(path).starts_with(&RepoPath::new(prefix)),
            expected
        );
    }

    #[test]
    fn test_repository_level() {
        let repo = RepoPath::repository();
        assert!(repo.is_repository());
        assert!(!repo.is_root());
        assert_eq!(repo.to_string(), ":repository");
        assert!(!repo.starts_with(&RepoPath::root()));
        assert!(!RepoPath::new("/a").starts_with(&repo));
        assert_eq!(":repository".parse::<RepoPath>().unwrap(), repo);
    }

    #[test]
    fn test_strip_prefix() {
        let path = RepoPath::new("/home/users/system/some/svc");
        let prefix = RepoPath::new("/home/users/system");
        assert_eq!(
            path.strip_prefix(&prefix).unwrap(),
            &["some".to_string(), "svc".to_string()]
        );
        assert!(prefix.strip_prefix(&path).is_none());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(RepoPath::new("/a/b/"), RepoPath::new("//a//b"));
        assert_ne!(RepoPath::root(), RepoPath::repository());
    }
}

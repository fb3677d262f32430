//! Identities declared by a content package.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

use super::path::RepoPath;

/// The three authorizable kinds a package can declare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
pub enum IdentityKind {
    SystemUser,
    User,
    Group,
}

/// One identity observed in the source tree.
///
/// Created the first time its declaring node is seen (recollection pass or
/// main pass) and immutable afterwards; the registry discards all identities
/// together on `reset()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    kind: IdentityKind,
    id: String,
    home: RepoPath,
    intermediate: RepoPath,
    disabled_reason: Option<String>,
}

impl Identity {
    /// Create an identity from its declaring node path. The intermediate
    /// path is the nearest materialized ancestor, i.e. the home's parent.
    pub fn new(kind: IdentityKind, id: impl Into<String>, home: RepoPath) -> Self {
        let intermediate = home.parent().unwrap_or_else(RepoPath::root);
        Identity {
            kind,
            id: id.into(),
            home,
            intermediate,
            disabled_reason: None,
        }
    }

    pub fn with_disabled_reason(mut self, reason: impl Into<String>) -> Self {
        self.disabled_reason = Some(reason.into());
        self
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn home(&self) -> &RepoPath {
        &self.home
    }

    pub fn intermediate(&self) -> &RepoPath {
        &self.intermediate
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        self.disabled_reason.as_deref()
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}::\"{}\"", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediate_is_home_parent() {
        let identity = Identity::new(
            IdentityKind::SystemUser,
            "svc-a",
            RepoPath::new("/home/users/system/some/svc-a"),
        );
        assert_eq!(
            identity.intermediate().to_string(),
            "/home/users/system/some"
        );
    }

    #[test]
    fn test_display() {
        let identity = Identity::new(IdentityKind::Group, "g", RepoPath::new("/home/groups/g"));
        assert_eq!(format!("{identity}"), r#"Group::"g""#);
    }

    #[test]
    fn test_disabled_reason() {
        let identity = Identity::new(
            IdentityKind::SystemUser,
            "svc-b",
            RepoPath::new("/home/users/system/svc-b"),
        )
        .with_disabled_reason("no longer used");
        assert_eq!(identity.disabled_reason(), Some("no longer used"));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "SystemUser".parse::<IdentityKind>().unwrap(),
            IdentityKind::SystemUser
        );
        assert!("Robot".parse::<IdentityKind>().is_err());
    }
}

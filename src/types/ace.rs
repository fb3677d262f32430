//! Access-control entries extracted from policy nodes.

use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::identity::Identity;
use super::path::RepoPath;

/// One restriction attached to an entry, e.g. `restriction(rep:glob,*/foo)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    name: String,
    values: Vec<String>,
}

impl Restriction {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Restriction {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

impl Display for Restriction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "restriction({},{})", self.name, self.values.iter().join(","))
    }
}

/// One access-control entry.
///
/// Built while parsing a single policy element and sealed once its
/// restrictions are attached; never mutated afterwards. The target is either
/// a node path, the repository level, or (for the principal-based form) an
/// independent effective path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    allow: bool,
    privileges: Vec<String>,
    target: RepoPath,
    principal_based: bool,
    restrictions: Vec<Restriction>,
}

impl AccessControlEntry {
    pub fn new(allow: bool, privileges: Vec<String>, target: RepoPath, principal_based: bool) -> Self {
        AccessControlEntry {
            allow,
            privileges,
            target,
            principal_based,
            restrictions: Vec::new(),
        }
    }

    pub fn push_restriction(&mut self, restriction: Restriction) {
        self.restrictions.push(restriction);
    }

    pub fn is_allow(&self) -> bool {
        self.allow
    }

    pub fn privileges(&self) -> &[String] {
        &self.privileges
    }

    pub fn target(&self) -> &RepoPath {
        &self.target
    }

    pub fn is_principal_based(&self) -> bool {
        self.principal_based
    }

    pub fn restrictions(&self) -> &[Restriction] {
        &self.restrictions
    }

    /// Render as one repo-init ACL line. A target equal to the owner's own
    /// home is rendered as a `home(id)` reference.
    pub fn render_line(&self, owner: Option<&Identity>) -> String {
        let action = if self.allow { "allow" } else { "deny" };
        let target = match owner {
            Some(identity) if self.target == *identity.home() => {
                format!("home({})", identity.id())
            }
            _ => self.target.to_string(),
        };
        let mut line = format!("{action} {} on {target}", self.privileges.iter().join(","));
        for restriction in &self.restrictions {
            line.push(' ');
            line.push_str(&restriction.to_string());
        }
        line
    }
}

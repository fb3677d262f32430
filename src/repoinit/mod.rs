//! Repo-init script model, parsing, and rewriting.

use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumDiscriminants, EnumString};

use crate::types::Restriction;

mod conversion_map;
pub mod parser;
pub mod rewriter;

pub use conversion_map::ConversionMap;
pub use rewriter::Rewriter;

/// Action of one ACL line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum AclAction {
    Allow,
    Deny,
    Remove,
}

/// One line of a `set ACL` / `set principal ACL` block.
///
/// Principal-scoped blocks put paths on the line (`allow ... on <paths>`);
/// path-scoped blocks put principals on the line (`allow ... for <ids>`).
/// Only the side matching the enclosing block is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclLine {
    pub action: AclAction,
    pub privileges: Vec<String>,
    pub paths: Vec<String>,
    pub principals: Vec<String>,
    pub restrictions: Vec<Restriction>,
}

impl AclLine {
    fn privileges_token(&self) -> String {
        if self.privileges.is_empty() {
            "*".to_string()
        } else {
            self.privileges.iter().join(",")
        }
    }

    fn restrictions_suffix(&self) -> String {
        self.restrictions
            .iter()
            .map(|r| format!(" {r}"))
            .collect::<String>()
    }

    /// Render in the principal-scoped form, `<action> <privs> on <paths>`.
    pub fn render_on(&self) -> String {
        self.render_on_paths(&self.paths)
    }

    /// Render in the principal-scoped form against an explicit path list,
    /// used when lowering a path-scoped line onto its statement's targets.
    pub fn render_on_paths(&self, paths: &[String]) -> String {
        format!(
            "{} {} on {}{}",
            self.action,
            self.privileges_token(),
            paths.iter().join(","),
            self.restrictions_suffix()
        )
    }

    /// Render in the path-scoped form, `<action> <privs> for <principals>`.
    pub fn render_for(&self) -> String {
        format!(
            "{} {} for {}{}",
            self.action,
            self.privileges_token(),
            self.principals.iter().join(","),
            self.restrictions_suffix()
        )
    }
}

/// The closed set of repo-init operations the rewriter dispatches over.
///
/// ACL statements and service user creation are parsed structurally; the
/// remaining kinds keep their raw statement text and pass through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(OperationKind), derive(StrumDisplay, EnumString))]
pub enum Operation {
    CreateServiceUser {
        ids: Vec<String>,
        path: Option<String>,
        forced: bool,
    },
    DeleteServiceUser(String),
    DisableServiceUser(String),
    CreateUser(String),
    DeleteUser(String),
    CreateGroup(String),
    DeleteGroup(String),
    AddGroupMembers(String),
    RemoveGroupMembers(String),
    RegisterNamespace(String),
    RegisterPrivilege(String),
    RegisterNodetypes(String),
    AddMixins(String),
    RemoveMixins(String),
    SetProperties(String),
    CreatePath(String),
    SetAclForPrincipals {
        principals: Vec<String>,
        options: Option<String>,
        lines: Vec<AclLine>,
    },
    SetAclOnPaths {
        paths: Vec<String>,
        options: Option<String>,
        lines: Vec<AclLine>,
    },
    SetPrincipalAcl {
        principals: Vec<String>,
        options: Option<String>,
        lines: Vec<AclLine>,
    },
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", OperationKind::from(self))
    }
}

/// Append ` (ACLOptions=...)` when options are present.
pub(crate) fn options_suffix(options: Option<&str>) -> String {
    match options {
        Some(options) => format!(" (ACLOptions={options})"),
        None => String::new(),
    }
}

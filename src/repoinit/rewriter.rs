//! Visitor-driven normalization of pre-existing repo-init scripts.

use std::fmt::Write;

use itertools::Itertools;
use tracing::debug;

use crate::error::ConversionError;
use crate::registry::IdentityRegistry;
use crate::types::{Identity, IdentityKind, RepoPath};

use super::conversion_map::ConversionMap;
use super::{AclAction, AclLine, Operation, options_suffix, parser};

/// Default root for service users created without a declared path.
const DEFAULT_SYSTEM_ROOT: &str = "/home/users/system";
const USERS_ROOT: &str = "/home/users";

/// Re-serializes repo-init operations, rerouting ACL lines for principals
/// subject to enforcement into the run-wide [`ConversionMap`] and leaving
/// everything else untouched.
///
/// The caller owns the map and flushes it exactly once after the last
/// script of the run has been visited.
pub struct Rewriter<'a> {
    registry: &'a mut IdentityRegistry,
    map: &'a mut ConversionMap,
}

impl<'a> Rewriter<'a> {
    pub fn new(registry: &'a mut IdentityRegistry, map: &'a mut ConversionMap) -> Self {
        Rewriter { registry, map }
    }

    pub fn rewrite(&mut self, script: &str) -> Result<String, ConversionError> {
        let operations = parser::parse(script)?;
        let mut out = String::new();
        for operation in &operations {
            debug!(event = "Rewrite", operation = %operation);
            match operation {
                Operation::CreateServiceUser { ids, path, forced } => {
                    self.visit_create_service_user(ids, path.as_deref(), *forced, &mut out)?;
                }
                Operation::SetAclForPrincipals {
                    principals,
                    options,
                    lines,
                } => {
                    self.visit_acl_for_principals(principals, options.as_deref(), lines, &mut out)?;
                }
                Operation::SetAclOnPaths {
                    paths,
                    options,
                    lines,
                } => {
                    self.visit_acl_on_paths(paths, options.as_deref(), lines, &mut out)?;
                }
                Operation::SetPrincipalAcl {
                    principals,
                    options,
                    lines,
                } => {
                    // Already principal-based; routed through the map so
                    // repeated blocks for one principal consolidate.
                    for principal in principals {
                        for line in lines {
                            self.map
                                .append(principal, options.as_deref(), line.render_on());
                        }
                    }
                }
                Operation::DeleteServiceUser(text)
                | Operation::DisableServiceUser(text)
                | Operation::CreateUser(text)
                | Operation::DeleteUser(text)
                | Operation::CreateGroup(text)
                | Operation::DeleteGroup(text)
                | Operation::AddGroupMembers(text)
                | Operation::RemoveGroupMembers(text)
                | Operation::RegisterNamespace(text)
                | Operation::RegisterPrivilege(text)
                | Operation::RegisterNodetypes(text)
                | Operation::AddMixins(text)
                | Operation::RemoveMixins(text)
                | Operation::SetProperties(text)
                | Operation::CreatePath(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
            }
        }
        Ok(out)
    }

    /// Choose, per user, between the enforced path and the declared one,
    /// and record the user into the enforcement index.
    fn visit_create_service_user(
        &mut self,
        ids: &[String],
        path: Option<&str>,
        forced: bool,
        out: &mut String,
    ) -> Result<(), ConversionError> {
        for id in ids {
            let intermediate = match path {
                Some(p) if p.starts_with('/') => RepoPath::new(p),
                Some(p) => RepoPath::new(USERS_ROOT).join(p),
                None => RepoPath::new(DEFAULT_SYSTEM_ROOT),
            };
            self.registry.add_system_user(Identity::new(
                IdentityKind::SystemUser,
                id.clone(),
                intermediate.join(id),
            ));
            self.registry.mark_declared(id);

            if self.registry.enforce_principal_based(id) {
                let enforced = self
                    .registry
                    .calculate_enforced_intermediate_path(&intermediate)?;
                writeln!(out, "create service user {id} with forced path {enforced}")?;
            } else {
                match path {
                    Some(p) if forced => {
                        writeln!(out, "create service user {id} with forced path {p}")?;
                    }
                    Some(p) => writeln!(out, "create service user {id} with path {p}")?,
                    None => writeln!(out, "create service user {id}")?,
                }
            }
        }
        Ok(())
    }

    /// Remove lines re-emit immediately, untouched. Grant/deny lines move
    /// to the map for enforced principals and re-emit inline for the rest.
    fn visit_acl_for_principals(
        &mut self,
        principals: &[String],
        options: Option<&str>,
        lines: &[AclLine],
        out: &mut String,
    ) -> Result<(), ConversionError> {
        let (removes, grants): (Vec<&AclLine>, Vec<&AclLine>) = lines
            .iter()
            .partition(|line| line.action == AclAction::Remove);

        if !removes.is_empty() {
            writeln!(
                out,
                "set ACL for {}{}",
                principals.iter().join(","),
                options_suffix(options)
            )?;
            for line in &removes {
                writeln!(out, "    {}", line.render_on())?;
            }
            out.push_str("end\n");
        }

        let (enforced, plain): (Vec<&String>, Vec<&String>) = principals
            .iter()
            .partition(|principal| self.registry.enforce_principal_based(principal));
        for principal in &enforced {
            for line in &grants {
                self.map.append(principal, options, line.render_on());
            }
        }
        if !plain.is_empty() && !grants.is_empty() {
            writeln!(
                out,
                "set ACL for {}{}",
                plain.iter().join(","),
                options_suffix(options)
            )?;
            for line in &grants {
                writeln!(out, "    {}", line.render_on())?;
            }
            out.push_str("end\n");
        }
        Ok(())
    }

    /// Per line: enforced principals move into a map entry lowered onto the
    /// statement's target paths; a line keeping principals re-emits
    /// narrowed; an emptied line drops.
    fn visit_acl_on_paths(
        &mut self,
        paths: &[String],
        options: Option<&str>,
        lines: &[AclLine],
        out: &mut String,
    ) -> Result<(), ConversionError> {
        let mut kept: Vec<String> = Vec::new();
        for line in lines {
            if line.action == AclAction::Remove {
                kept.push(line.render_for());
                continue;
            }
            let (enforced, plain): (Vec<&String>, Vec<&String>) = line
                .principals
                .iter()
                .partition(|principal| self.registry.enforce_principal_based(principal));
            for principal in &enforced {
                self.map
                    .append(principal, options, line.render_on_paths(paths));
            }
            if !plain.is_empty() {
                let mut narrowed = line.clone();
                narrowed.principals = plain.into_iter().cloned().collect();
                kept.push(narrowed.render_for());
            }
        }

        if !kept.is_empty() {
            writeln!(
                out,
                "set ACL on {}{}",
                paths.iter().join(","),
                options_suffix(options)
            )?;
            for line in &kept {
                writeln!(out, "    {line}")?;
            }
            out.push_str("end\n");
        }
        Ok(())
    }
}

//! Identity registry, enforcement decisions, and repo-init emission.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use tracing::{debug, warn};

use crate::error::ConversionError;
use crate::repoinit::ConversionMap;
use crate::types::{AccessControlEntry, Identity, IdentityKind, Mapping, RepoPath};

/// Root under which system users are materialized.
const SYSTEM_USER_ROOT: &str = "/home/users/system";
const USERS_ROOT: &str = "/home/users";

/// The enforcement configuration for one conversion run: an optional global
/// enforced path prefix plus the service user mappings that may override the
/// per-user decision.
#[derive(Debug, Clone, Default)]
pub struct EnforcementPolicy {
    enforced_path: Option<RepoPath>,
    mappings: Vec<Mapping>,
}

impl EnforcementPolicy {
    /// Build a policy. The enforced path, when given, must sit under the
    /// system user root or no user path could be expressed beneath it.
    pub fn new(
        enforced_path: Option<RepoPath>,
        mappings: Vec<Mapping>,
    ) -> Result<Self, ConversionError> {
        if let Some(path) = &enforced_path {
            if !path.starts_with(&RepoPath::new(SYSTEM_USER_ROOT)) {
                return Err(ConversionError::InvalidConfiguration(format!(
                    "enforced path '{path}' is not under {SYSTEM_USER_ROOT}"
                )));
            }
        }
        Ok(EnforcementPolicy {
            enforced_path,
            mappings,
        })
    }

    pub fn is_enforcing(&self) -> bool {
        self.enforced_path.is_some()
    }
}

/// Central correlation point for one conversion run.
///
/// Owns every identity and accepted ACE observed in the source tree, decides
/// principal-based vs resource-based representation, and emits the generated
/// repo-init text. One instance serves exactly one run at a time; reuse
/// in-process requires `reset()`.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    policy: EnforcementPolicy,
    identities: Vec<Identity>,
    index: HashMap<String, usize>,
    aces: Vec<(String, AccessControlEntry)>,
    declared: HashSet<String>,
}

impl IdentityRegistry {
    pub fn new(policy: EnforcementPolicy) -> Self {
        IdentityRegistry {
            policy,
            identities: Vec::new(),
            index: HashMap::new(),
            aces: Vec::new(),
            declared: HashSet::new(),
        }
    }

    pub fn add_system_user(&mut self, identity: Identity) {
        self.register(identity);
    }

    pub fn add_user(&mut self, identity: Identity) {
        self.register(identity);
    }

    pub fn add_group(&mut self, identity: Identity) {
        self.register(identity);
    }

    /// First observation wins; the recollection pass and the main pass see
    /// the same declaring nodes, so a repeat of a known id is a no-op.
    fn register(&mut self, identity: Identity) {
        if self.index.contains_key(identity.id()) {
            return;
        }
        debug!(event = "Register", identity = %identity, home = %identity.home());
        self.index.insert(identity.id().to_string(), self.identities.len());
        self.identities.push(identity);
    }

    /// Mark an id as declared by a pre-existing repo-init script. The
    /// script keeps its own create statement, so emission must not
    /// generate a second one.
    pub fn mark_declared(&mut self, id: &str) {
        self.declared.insert(id.to_string());
    }

    pub fn identity(&self, id: &str) -> Option<&Identity> {
        self.index.get(id).map(|&i| &self.identities[i])
    }

    pub fn is_system_user(&self, id: &str) -> bool {
        self.identity(id)
            .is_some_and(|i| i.kind() == IdentityKind::SystemUser)
    }

    /// Whether an ACE for `principal` on `target` can be converted.
    ///
    /// `Ok(false)` rejects the entry (unknown principal, or a regular user
    /// or group — those never receive generated ACL statements). A target
    /// inside a different identity's home is a fatal conflict; the owning
    /// principal's own home is fine and is later rendered as `home(id)`.
    pub fn accepts_acl(&self, principal: &str, target: &RepoPath) -> Result<bool, ConversionError> {
        if !self.is_system_user(principal) {
            debug!(
                event = "Acl",
                phase = "Rejected",
                principal = principal,
                target = %target
            );
            return Ok(false);
        }
        if !target.is_repository() {
            for identity in &self.identities {
                if target.starts_with(identity.home()) && identity.id() != principal {
                    return Err(ConversionError::AclCrossesHome {
                        principal: principal.to_string(),
                        path: target.to_string(),
                        owner: identity.id().to_string(),
                    });
                }
            }
        }
        Ok(true)
    }

    /// Offer one entry for conversion. Accepted entries are stored in
    /// first-seen order and owned by the registry until emission.
    pub fn add_acl(
        &mut self,
        principal: &str,
        ace: AccessControlEntry,
    ) -> Result<bool, ConversionError> {
        if !self.accepts_acl(principal, ace.target())? {
            return Ok(false);
        }
        self.aces.push((principal.to_string(), ace));
        Ok(true)
    }

    /// True iff an enforced path is configured, `id` is a known system user,
    /// and no old-style user mapping overrides the decision. A mapping that
    /// names `id` as its single user forces the decision to its flag.
    pub fn enforce_principal_based(&self, id: &str) -> bool {
        if !self.policy.is_enforcing() || !self.is_system_user(id) {
            return false;
        }
        for mapping in &self.policy.mappings {
            if mapping.maps_user(id) {
                return mapping.enforce();
            }
        }
        true
    }

    /// Rewrite a system user's natural intermediate path onto the enforced
    /// prefix, keeping the suffix beyond the system user root. The result is
    /// relative, as consumed by `create service user ... with forced path`.
    pub fn calculate_enforced_intermediate_path(
        &self,
        path: &RepoPath,
    ) -> Result<String, ConversionError> {
        let enforced = self.policy.enforced_path.as_ref().ok_or_else(|| {
            ConversionError::InvalidConfiguration("no enforced path configured".to_string())
        })?;
        // A path already under the enforced prefix stays where it is, so
        // re-converting generated output is stable.
        if path.starts_with(enforced) {
            let relative = path
                .strip_prefix(&RepoPath::new(USERS_ROOT))
                .ok_or_else(|| ConversionError::UnrepresentablePath(path.to_string()))?;
            return Ok(relative.join("/"));
        }

        let suffix = path
            .strip_prefix(&RepoPath::new(SYSTEM_USER_ROOT))
            .ok_or_else(|| ConversionError::UnrepresentablePath(path.to_string()))?;

        // Validated under /home/users/system at construction, so this
        // cannot miss.
        let mut segments = enforced
            .strip_prefix(&RepoPath::new(USERS_ROOT))
            .unwrap_or_default()
            .to_vec();
        segments.extend_from_slice(suffix);
        Ok(segments.join("/"))
    }

    /// Discard all identities and pending ACEs together.
    pub fn reset(&mut self) {
        self.identities.clear();
        self.index.clear();
        self.aces.clear();
        self.declared.clear();
    }

    /// Emit the generated repo-init text for everything recorded so far.
    ///
    /// Deterministic: identities and ACEs are walked in first-seen order.
    /// Lines subject to principal-based representation go into `map` instead
    /// of the returned text; the caller flushes the map once at end-of-run.
    pub fn emit_repoinit(&self, map: &mut ConversionMap) -> Result<String, ConversionError> {
        let mut out = String::new();

        for identity in &self.identities {
            if identity.kind() != IdentityKind::SystemUser {
                continue;
            }
            let id = identity.id();
            if self.declared.contains(id) {
                continue;
            }
            if self.enforce_principal_based(id) {
                let intermediate =
                    self.calculate_enforced_intermediate_path(identity.intermediate())?;
                writeln!(out, "create service user {id} with forced path {intermediate}")?;
            } else {
                writeln!(
                    out,
                    "create service user {id} with path {}",
                    identity.intermediate()
                )?;
            }
            if let Some(reason) = identity.disabled_reason() {
                writeln!(out, "disable service user {id} : \"{reason}\"")?;
            }
        }

        let mut created: Vec<&RepoPath> = Vec::new();
        for (_, ace) in &self.aces {
            let target = ace.target();
            if target.is_repository() || target.is_root() || created.contains(&target) {
                continue;
            }
            if self.identities.iter().any(|i| target.starts_with(i.home())) {
                continue;
            }
            writeln!(out, "create path {target}")?;
            created.push(target);
        }

        let mut order: Vec<&str> = Vec::new();
        for (principal, _) in &self.aces {
            if !order.contains(&principal.as_str()) {
                order.push(principal);
            }
        }

        for principal in order {
            let owner = self.identity(principal);
            let enforced = self.enforce_principal_based(principal);
            let mut inline: Vec<String> = Vec::new();
            for (p, ace) in &self.aces {
                if p != principal {
                    continue;
                }
                let line = ace.render_line(owner);
                if enforced || ace.is_principal_based() {
                    map.append(principal, None, line);
                } else {
                    inline.push(line);
                }
            }
            if !inline.is_empty() {
                writeln!(out, "set ACL for {principal}")?;
                for line in inline {
                    writeln!(out, "    {line}")?;
                }
                out.push_str("end\n");
            }
        }

        if out.is_empty() && map.is_empty() {
            warn!(event = "Emission", phase = "Empty");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Restriction;

    fn system_user(id: &str, home: &str) -> Identity {
        Identity::new(IdentityKind::SystemUser, id, RepoPath::new(home))
    }

    fn grant(privileges: &[&str], target: &str) -> AccessControlEntry {
        AccessControlEntry::new(
            true,
            privileges.iter().map(|p| p.to_string()).collect(),
            RepoPath::new(target),
            false,
        )
    }

    fn plain_registry() -> IdentityRegistry {
        IdentityRegistry::new(EnforcementPolicy::default())
    }

    fn enforcing_registry(enforced: &str, mappings: Vec<Mapping>) -> IdentityRegistry {
        IdentityRegistry::new(
            EnforcementPolicy::new(Some(RepoPath::new(enforced)), mappings).unwrap(),
        )
    }

    #[test]
    fn test_unknown_principal_is_rejected_softly() {
        let mut registry = plain_registry();
        let accepted = registry.add_acl("nobody", grant(&["jcr:read"], "/content/x")).unwrap();
        assert!(!accepted);
    }

    #[test]
    fn test_regular_user_never_gets_statements() {
        let mut registry = plain_registry();
        registry.add_user(Identity::new(
            IdentityKind::User,
            "alice",
            RepoPath::new("/home/users/alice"),
        ));
        let accepted = registry.add_acl("alice", grant(&["jcr:read"], "/content/x")).unwrap();
        assert!(!accepted);
    }

    #[test]
    fn test_acl_into_foreign_home_is_fatal() {
        let mut registry = plain_registry();
        registry.add_system_user(system_user("svc-a", "/home/users/system/svc-a"));
        registry.add_group(Identity::new(
            IdentityKind::Group,
            "g",
            RepoPath::new("/home/groups/g/foo"),
        ));

        let err = registry
            .add_acl("svc-a", grant(&["jcr:read"], "/home/groups/g/foo"))
            .unwrap_err();
        assert!(matches!(err, ConversionError::AclCrossesHome { .. }));

        let err = registry
            .add_acl("svc-a", grant(&["jcr:read"], "/home/groups/g/foo/bar"))
            .unwrap_err();
        assert!(matches!(err, ConversionError::AclCrossesHome { .. }));
    }

    #[test]
    fn test_own_home_renders_home_reference() {
        let mut registry = plain_registry();
        registry.add_system_user(system_user("svc-a", "/home/users/system/svc-a"));
        registry
            .add_acl("svc-a", grant(&["jcr:all"], "/home/users/system/svc-a"))
            .unwrap();

        let mut map = ConversionMap::new();
        insta::assert_snapshot!(registry.emit_repoinit(&mut map).unwrap(), @r#"
        create service user svc-a with path /home/users/system
        set ACL for svc-a
            allow jcr:all on home(svc-a)
        end
        "#);
        assert!(map.is_empty());
    }

    #[test]
    fn test_basic_emission() {
        let mut registry = plain_registry();
        registry.add_system_user(system_user("svc-a", "/home/users/system/svc-a"));
        registry
            .add_acl("svc-a", grant(&["jcr:read"], "/content/x"))
            .unwrap();

        let mut map = ConversionMap::new();
        insta::assert_snapshot!(registry.emit_repoinit(&mut map).unwrap(), @r#"
        create service user svc-a with path /home/users/system
        create path /content/x
        set ACL for svc-a
            allow jcr:read on /content/x
        end
        "#);
    }

    #[test]
    fn test_emission_preserves_line_order_and_restrictions() {
        let mut registry = plain_registry();
        registry.add_system_user(system_user("svc-a", "/home/users/system/svc-a"));
        let mut restricted = grant(&["jcr:read"], "/content/x");
        restricted.push_restriction(Restriction::new("rep:glob", vec!["*/foo".into()]));
        registry.add_acl("svc-a", restricted).unwrap();
        let deny = AccessControlEntry::new(
            false,
            vec!["jcr:write".into()],
            RepoPath::new("/content/x"),
            false,
        );
        registry.add_acl("svc-a", deny).unwrap();

        let mut map = ConversionMap::new();
        insta::assert_snapshot!(registry.emit_repoinit(&mut map).unwrap(), @r#"
        create service user svc-a with path /home/users/system
        create path /content/x
        set ACL for svc-a
            allow jcr:read on /content/x restriction(rep:glob,*/foo)
            deny jcr:write on /content/x
        end
        "#);
    }

    #[test]
    fn test_enforced_emission_routes_to_principal_blocks() {
        let mut registry = enforcing_registry("/home/users/system/cq:services", Vec::new());
        registry.add_system_user(system_user("svc", "/home/users/system/some/svc"));
        registry
            .add_acl("svc", grant(&["jcr:read"], "/content/x"))
            .unwrap();

        let mut map = ConversionMap::new();
        let out = registry.emit_repoinit(&mut map).unwrap();
        insta::assert_snapshot!(out, @r#"
        create service user svc with forced path system/cq:services/some
        create path /content/x
        "#);
        insta::assert_snapshot!(map.flush(), @r#"
        set principal ACL for svc
            allow jcr:read on /content/x
        end
        "#);
    }

    #[test]
    fn test_mapping_overrides_enforcement() {
        let mappings = vec![
            Mapping::parse("bundle-a:sub=svc-a", false).unwrap(),
            Mapping::parse("bundle-b:sub=svc-b", true).unwrap(),
        ];
        let mut registry = enforcing_registry("/home/users/system/cq:services", mappings);
        registry.add_system_user(system_user("svc-a", "/home/users/system/svc-a"));
        registry.add_system_user(system_user("svc-b", "/home/users/system/svc-b"));
        registry.add_system_user(system_user("svc-c", "/home/users/system/svc-c"));

        assert!(!registry.enforce_principal_based("svc-a"));
        assert!(registry.enforce_principal_based("svc-b"));
        assert!(registry.enforce_principal_based("svc-c"));
    }

    #[test]
    fn test_enforcement_requires_known_system_user() {
        let registry = enforcing_registry("/home/users/system/cq:services", Vec::new());
        assert!(!registry.enforce_principal_based("unknown"));
    }

    #[test]
    fn test_enforced_intermediate_path_example() {
        let mut registry = enforcing_registry("/home/users/system/cq:services", Vec::new());
        registry.add_system_user(system_user("svc", "/home/users/system/some/svc"));
        assert_eq!(
            registry
                .calculate_enforced_intermediate_path(&RepoPath::new("/home/users/system/some"))
                .unwrap(),
            "system/cq:services/some"
        );
        assert_eq!(
            registry
                .calculate_enforced_intermediate_path(&RepoPath::new("/home/users/system"))
                .unwrap(),
            "system/cq:services"
        );
    }

    #[test]
    fn test_enforced_intermediate_path_is_stable_under_enforced_prefix() {
        let registry = enforcing_registry("/home/users/system/cq:services", Vec::new());
        assert_eq!(
            registry
                .calculate_enforced_intermediate_path(&RepoPath::new(
                    "/home/users/system/cq:services/some"
                ))
                .unwrap(),
            "system/cq:services/some"
        );
    }

    #[test]
    fn test_enforced_intermediate_path_outside_system_root() {
        let registry = enforcing_registry("/home/users/system/cq:services", Vec::new());
        let err = registry
            .calculate_enforced_intermediate_path(&RepoPath::new("/home/users/alice"))
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnrepresentablePath(_)));
    }

    #[test]
    fn test_enforced_path_must_be_under_system_root() {
        let err = EnforcementPolicy::new(Some(RepoPath::new("/content")), Vec::new()).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_declared_users_get_no_generated_create() {
        let mut registry = plain_registry();
        registry.add_system_user(system_user("svc-a", "/home/users/system/svc-a"));
        registry.mark_declared("svc-a");
        registry
            .add_acl("svc-a", grant(&["jcr:read"], "/content/x"))
            .unwrap();

        let mut map = ConversionMap::new();
        insta::assert_snapshot!(registry.emit_repoinit(&mut map).unwrap(), @r#"
        create path /content/x
        set ACL for svc-a
            allow jcr:read on /content/x
        end
        "#);
    }

    #[test]
    fn test_reregistration_is_a_noop() {
        let mut registry = plain_registry();
        registry.add_system_user(system_user("svc-a", "/home/users/system/svc-a"));
        registry.add_system_user(system_user("svc-a", "/home/users/system/other/svc-a"));
        assert_eq!(
            registry.identity("svc-a").unwrap().home().to_string(),
            "/home/users/system/svc-a"
        );
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut registry = plain_registry();
        registry.add_system_user(system_user("svc-a", "/home/users/system/svc-a"));
        registry
            .add_acl("svc-a", grant(&["jcr:read"], "/content/x"))
            .unwrap();
        registry.reset();

        assert!(registry.identity("svc-a").is_none());
        let mut map = ConversionMap::new();
        assert_eq!(registry.emit_repoinit(&mut map).unwrap(), "");
    }
}

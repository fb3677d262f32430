//! Line-oriented parsing of repo-init scripts.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConversionError;
use crate::types::Restriction;

use super::{AclAction, AclLine, Operation};

static CREATE_SERVICE_USER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^create service user ([^\s]+(?:\s*,\s*[^\s]+)*?)(?: with (forced )?path (\S+))?$")
        .expect("statement pattern is valid")
});

static SET_PRINCIPAL_ACL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^set principal ACL for (.+?)(?:\s+\(ACLOptions=([^)]+)\))?$")
        .expect("statement pattern is valid")
});

static SET_ACL_FOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^set ACL for (.+?)(?:\s+\(ACLOptions=([^)]+)\))?$")
        .expect("statement pattern is valid")
});

static SET_ACL_ON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^set ACL on (.+?)(?:\s+\(ACLOptions=([^)]+)\))?$")
        .expect("statement pattern is valid")
});

static ACL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(allow|deny)\s+(\S+)\s+(on|for)\s+(\S+)((?:\s+restriction\([^)]*\))*)$")
        .expect("line pattern is valid")
});

static REMOVE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^remove\s+(\*|\S+)\s+(on|for)\s+(\S+)$").expect("line pattern is valid")
});

static RESTRICTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"restriction\(([^),]+),?([^)]*)\)").expect("pattern is valid"));

/// Single-line statements that pass through the rewriter verbatim, checked
/// in order (longer prefixes first).
const PASSTHROUGH: [(&str, fn(String) -> Operation); 13] = [
    ("delete service user ", Operation::DeleteServiceUser),
    ("disable service user ", Operation::DisableServiceUser),
    ("create user ", Operation::CreateUser),
    ("delete user ", Operation::DeleteUser),
    ("create group ", Operation::CreateGroup),
    ("delete group ", Operation::DeleteGroup),
    ("register namespace ", Operation::RegisterNamespace),
    ("register privilege ", Operation::RegisterPrivilege),
    ("add mixin ", Operation::AddMixins),
    ("remove mixin ", Operation::RemoveMixins),
    ("add ", Operation::AddGroupMembers),
    ("remove ", Operation::RemoveGroupMembers),
    ("create path ", Operation::CreatePath),
];

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a full script into its operation sequence. Blank lines and `#`
/// comments are skipped; an unrecognized statement is a fatal error, never
/// silently dropped.
pub fn parse(text: &str) -> Result<Vec<Operation>, ConversionError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut operations = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(c) = CREATE_SERVICE_USER.captures(line) {
            operations.push(Operation::CreateServiceUser {
                ids: split_list(&c[1]),
                path: c.get(3).map(|m| m.as_str().to_string()),
                forced: c.get(2).is_some(),
            });
        } else if let Some(c) = SET_PRINCIPAL_ACL.captures(line) {
            let (block, next) = parse_acl_block(&lines, i)?;
            i = next;
            operations.push(Operation::SetPrincipalAcl {
                principals: split_list(&c[1]),
                options: c.get(2).map(|m| m.as_str().to_string()),
                lines: block,
            });
        } else if let Some(c) = SET_ACL_FOR.captures(line) {
            let (block, next) = parse_acl_block(&lines, i)?;
            i = next;
            operations.push(Operation::SetAclForPrincipals {
                principals: split_list(&c[1]),
                options: c.get(2).map(|m| m.as_str().to_string()),
                lines: block,
            });
        } else if let Some(c) = SET_ACL_ON.captures(line) {
            let (block, next) = parse_acl_block(&lines, i)?;
            i = next;
            operations.push(Operation::SetAclOnPaths {
                paths: split_list(&c[1]),
                options: c.get(2).map(|m| m.as_str().to_string()),
                lines: block,
            });
        } else if line.starts_with("register nodetypes") {
            let (text, next) = collect_until(&lines, i - 1, |l| l.contains("===>>"))?;
            i = next;
            operations.push(Operation::RegisterNodetypes(text));
        } else if line.starts_with("set properties") {
            let (text, next) = collect_until(&lines, i - 1, |l| l.trim() == "end")?;
            i = next;
            operations.push(Operation::SetProperties(text));
        } else if let Some((_, build)) = PASSTHROUGH
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix))
        {
            operations.push(build(line.to_string()));
        } else {
            return Err(ConversionError::RepoInitError(format!(
                "unsupported statement: '{line}'"
            )));
        }
    }
    Ok(operations)
}

/// Collect a block statement, inclusive of its terminator line.
fn collect_until(
    lines: &[&str],
    start: usize,
    done: impl Fn(&str) -> bool,
) -> Result<(String, usize), ConversionError> {
    let mut i = start + 1;
    while i < lines.len() {
        if done(lines[i]) {
            let text = lines[start..=i]
                .iter()
                .map(|l| l.trim_end())
                .collect::<Vec<_>>()
                .join("\n");
            return Ok((text, i + 1));
        }
        i += 1;
    }
    Err(ConversionError::RepoInitError(format!(
        "unterminated block: '{}'",
        lines[start].trim()
    )))
}

fn parse_acl_block(
    lines: &[&str],
    mut i: usize,
) -> Result<(Vec<AclLine>, usize), ConversionError> {
    let mut block = Vec::new();
    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;
        if line == "end" {
            return Ok((block, i));
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        block.push(parse_acl_line(line)?);
    }
    Err(ConversionError::RepoInitError(
        "ACL block not terminated by 'end'".to_string(),
    ))
}

fn parse_acl_line(line: &str) -> Result<AclLine, ConversionError> {
    if let Some(c) = REMOVE_LINE.captures(line) {
        let privileges = if &c[1] == "*" {
            Vec::new()
        } else {
            split_list(&c[1])
        };
        let targets = split_list(&c[3]);
        let (paths, principals) = if &c[2] == "on" {
            (targets, Vec::new())
        } else {
            (Vec::new(), targets)
        };
        return Ok(AclLine {
            action: AclAction::Remove,
            privileges,
            paths,
            principals,
            restrictions: Vec::new(),
        });
    }

    let Some(c) = ACL_LINE.captures(line) else {
        return Err(ConversionError::RepoInitError(format!(
            "unsupported ACL line: '{line}'"
        )));
    };
    let action = if &c[1] == "allow" {
        AclAction::Allow
    } else {
        AclAction::Deny
    };
    let targets = split_list(&c[4]);
    let (paths, principals) = if &c[3] == "on" {
        (targets, Vec::new())
    } else {
        (Vec::new(), targets)
    };
    let restrictions = RESTRICTION
        .captures_iter(&c[5])
        .map(|r| Restriction::new(r[1].to_string(), split_list(&r[2])))
        .collect();

    Ok(AclLine {
        action,
        privileges: split_list(&c[2]),
        paths,
        principals,
        restrictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn test_parse_create_service_user_variants() {
        let ops = parse(
            "create service user svc-a\n\
             create service user svc-b with path /home/users/system/b\n\
             create service user svc-c,svc-d with forced path system/sub\n",
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::CreateServiceUser {
                    ids: vec!["svc-a".into()],
                    path: None,
                    forced: false,
                },
                Operation::CreateServiceUser {
                    ids: vec!["svc-b".into()],
                    path: Some("/home/users/system/b".into()),
                    forced: false,
                },
                Operation::CreateServiceUser {
                    ids: vec!["svc-c".into(), "svc-d".into()],
                    path: Some("system/sub".into()),
                    forced: true,
                },
            ]
        );
    }

    #[test]
    fn test_parse_set_acl_for_block() {
        let ops = parse(
            "set ACL for svc-a,svc-b (ACLOptions=mergePreserveOrder)\n\
             \x20   allow jcr:read on /content/x restriction(rep:glob,*/foo)\n\
             \x20   remove * on /content/y\n\
             end\n",
        )
        .unwrap();
        let Operation::SetAclForPrincipals {
            principals,
            options,
            lines,
        } = &ops[0]
        else {
            panic!("expected a principal-list ACL statement");
        };
        assert_eq!(principals, &["svc-a", "svc-b"]);
        assert_eq!(options.as_deref(), Some("mergePreserveOrder"));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].action, AclAction::Allow);
        assert_eq!(lines[0].paths, vec!["/content/x"]);
        assert_eq!(lines[0].restrictions[0].name(), "rep:glob");
        assert_eq!(lines[1].action, AclAction::Remove);
    }

    #[test]
    fn test_parse_set_acl_on_block() {
        let ops = parse(
            "set ACL on /content/x,/content/y\n\
             \x20   allow jcr:read for svc-a,alice\n\
             end\n",
        )
        .unwrap();
        let Operation::SetAclOnPaths { paths, lines, .. } = &ops[0] else {
            panic!("expected a path-list ACL statement");
        };
        assert_eq!(paths, &["/content/x", "/content/y"]);
        assert_eq!(lines[0].principals, vec!["svc-a", "alice"]);
        assert!(lines[0].paths.is_empty());
    }

    #[test]
    fn test_parse_principal_acl_block() {
        let ops = parse(
            "set principal ACL for svc-a\n\
             \x20   allow jcr:read on home(svc-a)\n\
             end\n",
        )
        .unwrap();
        let Operation::SetPrincipalAcl { principals, lines, .. } = &ops[0] else {
            panic!("expected a principal ACL statement");
        };
        assert_eq!(principals, &["svc-a"]);
        assert_eq!(lines[0].paths, vec!["home(svc-a)"]);
    }

    #[test]
    fn test_parse_passthrough_statements() {
        let script = "create group devs\n\
                      delete user bob\n\
                      register namespace (ex) http://example.com/ns\n\
                      add alice to group devs\n\
                      add mixin mix:versionable to /content/x\n\
                      create path (sling:Folder) /content/z\n";
        let ops = parse(script).unwrap();
        assert_eq!(ops.len(), 6);
        assert_eq!(ops[0], Operation::CreateGroup("create group devs".into()));
        assert_eq!(
            ops[4],
            Operation::AddMixins("add mixin mix:versionable to /content/x".into())
        );
    }

    #[test]
    fn test_parse_nodetypes_heredoc() {
        let script = "register nodetypes <<===\n\
                      <<  [ex:type] > nt:unstructured\n\
                      ===>>\n";
        let ops = parse(script).unwrap();
        let Operation::RegisterNodetypes(text) = &ops[0] else {
            panic!("expected a nodetypes registration");
        };
        assert!(text.starts_with("register nodetypes <<==="));
        assert!(text.ends_with("===>>"));
    }

    #[test]
    fn test_parse_set_properties_block() {
        let script = "set properties on /content/x\n\
                      \x20   set sling:ResourceType{String} to /x/y/z\n\
                      end\n";
        let ops = parse(script).unwrap();
        assert!(matches!(&ops[0], Operation::SetProperties(t) if t.ends_with("end")));
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let ops = parse("# bootstrap\n\ncreate group devs\n").unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[parameterized(
        unknown_statement = { "frobnicate /content\n" },
        unterminated_block = { "set ACL for svc-a\n    allow jcr:read on /x\n" },
        bad_acl_line = { "set ACL for svc-a\n    allow\n end\n" },
    )]
    fn test_parse_failures(script: &str) {
        assert!(parse(script).is_err());
    }
}

//! Principal-based policy extraction (`rep:PrincipalPolicy` documents).

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, info};

use crate::error::ConversionError;
use crate::registry::IdentityRegistry;
use crate::types::{AccessControlEntry, RepoPath, Restriction};

use super::resource::RESTRICTION_NAMES;
use super::{PolicyOutcome, attribute, decode_value, decode_values};

/// One open `rep:PrincipalEntry` while its element is being walked.
struct PendingEntry {
    ace: AccessControlEntry,
    accepted: bool,
    supported: bool,
    start: usize,
    depth: usize,
}

/// Walk the `rep:PrincipalEntry` children of a `rep:PrincipalPolicy`
/// document. These nodes live exclusively under their own principal's home
/// subtree, so the owning principal must already be registered.
///
/// Entries are independent, so acceptance is tracked per entry: accepted
/// entries are omitted from the repackaged content while rejected ones are
/// carried over into a filtered copy of the document.
pub fn extract(
    registry: &mut IdentityRegistry,
    policy_path: &RepoPath,
    xml: &str,
) -> Result<PolicyOutcome, ConversionError> {
    let mut reader = Reader::from_str(xml);
    let mut prev = 0usize;
    let mut owner: Option<String> = None;
    let mut root: Option<(String, String)> = None;
    let mut pending: Option<PendingEntry> = None;
    let mut rejected: Vec<String> = Vec::new();
    let mut accepted = 0usize;

    loop {
        let event = reader.read_event()?;
        let pos = reader.buffer_position() as usize;
        match event {
            Event::Start(e) => match (pending.as_mut(), owner.as_deref()) {
                (Some(entry), _) => {
                    if is_restrictions(&e)? {
                        attach_restrictions(&e, entry)?;
                    }
                    entry.depth += 1;
                }
                (None, None) => {
                    owner = Some(open_root(registry, policy_path, &e)?);
                    root = Some((element_name(&e), xml[prev..pos].trim().to_string()));
                }
                (None, Some(owner_id)) => {
                    if is_entry(&e)? {
                        pending = Some(open_entry(registry, owner_id, &e, prev)?);
                    }
                }
            },
            Event::Empty(e) => match (pending.as_mut(), owner.as_deref()) {
                (Some(entry), _) => {
                    if is_restrictions(&e)? {
                        attach_restrictions(&e, entry)?;
                    }
                }
                (None, None) => {
                    // A self-closing policy root declares no entries.
                    open_root(registry, policy_path, &e)?;
                    return Ok(PolicyOutcome::Drop);
                }
                (None, Some(owner_id)) => {
                    if is_entry(&e)? {
                        let owner_id = owner_id.to_string();
                        let entry = open_entry(registry, &owner_id, &e, prev)?;
                        finalize(
                            registry,
                            &owner_id,
                            entry,
                            pos,
                            xml,
                            &mut rejected,
                            &mut accepted,
                        )?;
                    }
                }
            },
            Event::End(_) => {
                if let Some(mut entry) = pending.take() {
                    if entry.depth == 0 {
                        if let Some(owner_id) = owner.clone() {
                            finalize(
                                registry,
                                &owner_id,
                                entry,
                                pos,
                                xml,
                                &mut rejected,
                                &mut accepted,
                            )?;
                        }
                    } else {
                        entry.depth -= 1;
                        pending = Some(entry);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        prev = pos;
    }

    if rejected.is_empty() {
        debug!(event = "Policy", phase = "Converted", path = %policy_path);
        return Ok(PolicyOutcome::Drop);
    }
    info!(
        event = "Policy",
        phase = "Retained",
        path = %policy_path,
        rejected = rejected.len()
    );
    if accepted == 0 {
        return Ok(PolicyOutcome::Retain);
    }

    let Some((name, tag)) = root else {
        return Ok(PolicyOutcome::Retain);
    };
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    doc.push_str(&tag);
    doc.push('\n');
    for slice in &rejected {
        doc.push_str("    ");
        doc.push_str(slice);
        doc.push('\n');
    }
    doc.push_str(&format!("</{name}>\n"));
    Ok(PolicyOutcome::RetainFiltered(doc))
}

fn element_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.name().as_ref()).into_owned()
}

fn is_entry(element: &BytesStart<'_>) -> Result<bool, ConversionError> {
    Ok(attribute(element, b"jcr:primaryType")?.as_deref() == Some("rep:PrincipalEntry"))
}

fn is_restrictions(element: &BytesStart<'_>) -> Result<bool, ConversionError> {
    Ok(attribute(element, b"jcr:primaryType")?.as_deref() == Some("rep:Restrictions"))
}

fn open_root(
    registry: &IdentityRegistry,
    policy_path: &RepoPath,
    element: &BytesStart<'_>,
) -> Result<String, ConversionError> {
    let owner = attribute(element, b"rep:principalName")?.ok_or_else(|| {
        ConversionError::XmlError(format!("principal policy at '{policy_path}' names no principal"))
    })?;
    if registry.identity(&owner).is_none() {
        return Err(ConversionError::UnknownPrincipal(owner));
    }
    Ok(owner)
}

/// Entries are always allows and carry an arbitrary effective path,
/// independent of the owner's home.
fn open_entry(
    registry: &IdentityRegistry,
    owner: &str,
    element: &BytesStart<'_>,
    start: usize,
) -> Result<PendingEntry, ConversionError> {
    let target = match attribute(element, b"rep:effectivePath")? {
        Some(raw) if !decode_value(&raw).is_empty() => RepoPath::new(decode_value(&raw)),
        _ => RepoPath::repository(),
    };
    let privileges = attribute(element, b"rep:privileges")?
        .map(|raw| decode_values(&raw))
        .unwrap_or_default();
    let ace = AccessControlEntry::new(true, privileges, target, true);
    let accepted = registry.accepts_acl(owner, ace.target())?;
    Ok(PendingEntry {
        ace,
        accepted,
        supported: true,
        start,
        depth: 0,
    })
}

/// Principal entries accept multi-valued restrictions, but only over the
/// recognized restriction names; anything else rejects the entry.
fn attach_restrictions(
    element: &BytesStart<'_>,
    entry: &mut PendingEntry,
) -> Result<(), ConversionError> {
    let mut restrictions = Vec::new();
    for attr in element.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "jcr:primaryType" || key.starts_with("xmlns") {
            continue;
        }
        if !RESTRICTION_NAMES.contains(&key.as_str()) {
            debug!(event = "Policy", phase = "Unsupported", restriction = key);
            entry.supported = false;
            return Ok(());
        }
        let raw = attr.unescape_value()?;
        restrictions.push(Restriction::new(key, decode_values(&raw)));
    }
    if entry.supported {
        for restriction in restrictions {
            entry.ace.push_restriction(restriction);
        }
    }
    Ok(())
}

fn finalize(
    registry: &mut IdentityRegistry,
    owner: &str,
    entry: PendingEntry,
    end: usize,
    xml: &str,
    rejected: &mut Vec<String>,
    accepted: &mut usize,
) -> Result<(), ConversionError> {
    if entry.accepted && entry.supported {
        registry.add_acl(owner, entry.ace)?;
        *accepted += 1;
    } else {
        rejected.push(xml[entry.start..end].trim().to_string());
    }
    Ok(())
}

//! Resource-based policy extraction (`rep:ACL` documents).

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, info};

use crate::error::ConversionError;
use crate::registry::IdentityRegistry;
use crate::types::{AccessControlEntry, RepoPath, Restriction};

use super::{PolicyOutcome, attribute, decode_values};

/// Restriction properties recognized on a `rep:restrictions` child.
pub(crate) const RESTRICTION_NAMES: [&str; 4] =
    ["rep:glob", "rep:ntNames", "rep:prefixes", "rep:itemNames"];

/// Node name of a repository-level policy.
const REPO_POLICY_NODE: &str = "rep:repoPolicy";

enum Frame {
    /// An open ACE element; `None` once the entry was rejected.
    Ace(Option<(String, AccessControlEntry)>),
    Other,
}

/// Walk the `rep:GrantACE`/`rep:DenyACE` children of a `rep:ACL` document in
/// document order, offering each entry to the registry.
///
/// `policy_path` is the path of the policy node itself; the ACL target is
/// its parent, or the repository level for a `rep:repoPolicy` node. If any
/// entry is rejected the whole document is retained: splitting one ACL
/// document between converted and retained halves is unsafe.
pub fn extract(
    registry: &mut IdentityRegistry,
    policy_path: &RepoPath,
    xml: &str,
) -> Result<PolicyOutcome, ConversionError> {
    let target = if policy_path.segments().last().map(String::as_str) == Some(REPO_POLICY_NODE) {
        RepoPath::repository()
    } else {
        policy_path.parent().unwrap_or_else(RepoPath::root)
    };

    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Frame> = Vec::new();
    let mut any_rejected = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let frame = open_element(registry, &e, &target, &mut stack, &mut any_rejected)?;
                stack.push(frame);
            }
            Event::Empty(e) => {
                // Self-closing: open and finalize in one step.
                let frame = open_element(registry, &e, &target, &mut stack, &mut any_rejected)?;
                close_frame(registry, frame)?;
            }
            Event::End(_) => {
                if let Some(frame) = stack.pop() {
                    close_frame(registry, frame)?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if any_rejected {
        info!(event = "Policy", phase = "Retained", path = %policy_path);
        Ok(PolicyOutcome::Retain)
    } else {
        debug!(event = "Policy", phase = "Converted", path = %policy_path);
        Ok(PolicyOutcome::Drop)
    }
}

fn open_element(
    registry: &mut IdentityRegistry,
    element: &BytesStart<'_>,
    target: &RepoPath,
    stack: &mut [Frame],
    any_rejected: &mut bool,
) -> Result<Frame, ConversionError> {
    match attribute(element, b"jcr:primaryType")?.as_deref() {
        Some(primary @ ("rep:GrantACE" | "rep:DenyACE")) => {
            let principal = attribute(element, b"rep:principalName")?.ok_or_else(|| {
                ConversionError::XmlError(format!("ACE at '{target}' has no principal name"))
            })?;
            let privileges = attribute(element, b"rep:privileges")?
                .map(|raw| decode_values(&raw))
                .unwrap_or_default();
            let ace = AccessControlEntry::new(
                primary == "rep:GrantACE",
                privileges,
                target.clone(),
                false,
            );
            if registry.accepts_acl(&principal, target)? {
                Ok(Frame::Ace(Some((principal, ace))))
            } else {
                *any_rejected = true;
                Ok(Frame::Ace(None))
            }
        }
        Some("rep:Restrictions") => {
            if attach_restrictions(element, stack)? {
                *any_rejected = true;
            }
            Ok(Frame::Other)
        }
        _ => Ok(Frame::Other),
    }
}

/// Restrictions attach to the nearest open accepted entry; nothing attaches
/// once an entry is rejected. A restriction name outside the recognized set
/// demotes the entry instead (soft skip, the document is retained).
///
/// Returns true when the entry was demoted.
fn attach_restrictions(
    element: &BytesStart<'_>,
    stack: &mut [Frame],
) -> Result<bool, ConversionError> {
    let open_entry = stack.iter_mut().rev().find_map(|frame| match frame {
        Frame::Ace(entry) => Some(entry),
        Frame::Other => None,
    });
    let Some(slot) = open_entry else {
        return Ok(false);
    };
    if slot.is_none() {
        return Ok(false);
    }

    let mut restrictions = Vec::new();
    for attr in element.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "jcr:primaryType" || key.starts_with("xmlns") {
            continue;
        }
        if !RESTRICTION_NAMES.contains(&key.as_str()) {
            debug!(event = "Policy", phase = "Unsupported", restriction = key);
            *slot = None;
            return Ok(true);
        }
        let raw = attr.unescape_value()?;
        restrictions.push(Restriction::new(key, decode_values(&raw)));
    }

    let Some((_, ace)) = slot else { return Ok(false) };
    for restriction in restrictions {
        ace.push_restriction(restriction);
    }
    Ok(false)
}

fn close_frame(registry: &mut IdentityRegistry, frame: Frame) -> Result<(), ConversionError> {
    if let Frame::Ace(Some((principal, ace))) = frame {
        registry.add_acl(&principal, ace)?;
    }
    Ok(())
}

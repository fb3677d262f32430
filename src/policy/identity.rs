//! Extraction of identity-declaring nodes.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use crate::error::ConversionError;
use crate::registry::IdentityRegistry;
use crate::types::{Identity, IdentityKind, RepoPath};

use super::attribute;

/// Parse an authorizable document (`rep:SystemUser`, `rep:User`,
/// `rep:Group`) rooted at `path` and register the identity it declares.
///
/// Returns the declared kind, or `None` when the document declares no
/// authorizable. Both passes call this; the registry keeps the first
/// observation.
pub fn extract(
    registry: &mut IdentityRegistry,
    path: &RepoPath,
    xml: &str,
) -> Result<Option<IdentityKind>, ConversionError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let kind = match attribute(&e, b"jcr:primaryType")?.as_deref() {
                    Some("rep:SystemUser") => IdentityKind::SystemUser,
                    Some("rep:User") => IdentityKind::User,
                    Some("rep:Group") => IdentityKind::Group,
                    _ => return Ok(None),
                };
                let id = attribute(&e, b"rep:principalName")?
                    .or(attribute(&e, b"rep:authorizableId")?)
                    .ok_or_else(|| {
                        ConversionError::XmlError(format!(
                            "authorizable at '{path}' has no principal name"
                        ))
                    })?;

                let mut identity = Identity::new(kind, id, path.clone());
                if let Some(reason) = attribute(&e, b"rep:disabled")? {
                    identity = identity.with_disabled_reason(reason);
                }
                debug!(event = "Identity", identity = %identity, path = %path);

                match kind {
                    IdentityKind::SystemUser => registry.add_system_user(identity),
                    IdentityKind::User => registry.add_user(identity),
                    IdentityKind::Group => registry.add_group(identity),
                }
                return Ok(Some(kind));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

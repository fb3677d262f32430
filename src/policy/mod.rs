//! Policy-node extraction from serialized content documents.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

pub mod identity;
pub mod principal;
pub mod resource;

/// What the repackaged content should do with one source policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyOutcome {
    /// Every entry converted; the document is dropped from the output.
    Drop,
    /// At least one entry could not be converted; keep the document verbatim.
    Retain,
    /// Converted entries omitted, rejected entries kept in a filtered copy.
    RetainFiltered(String),
}

/// Strip a typed-value hint (`{Name}`, `{String}`, ...) off a property value.
pub(crate) fn decode_value(raw: &str) -> &str {
    if let Some(rest) = raw.strip_prefix('{') {
        if let Some(end) = rest.find('}') {
            return &rest[end + 1..];
        }
    }
    raw
}

/// Decode a possibly multi-valued property: drops the type hint and the
/// `[...]` wrapper, then splits on unescaped commas (`\,` escapes one).
pub(crate) fn decode_values(raw: &str) -> Vec<String> {
    let value = decode_value(raw);
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);

    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' => {
                values.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    values.push(current);
    values.retain(|v| !v.is_empty());
    values
}

/// The `jcr:primaryType` of a document's root element, if any.
pub(crate) fn document_primary_type(xml: &str) -> Result<Option<String>, ConversionError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => return attribute(&e, b"jcr:primaryType"),
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Look up one attribute on an element by its qualified name.
pub(crate) fn attribute(
    element: &BytesStart<'_>,
    name: &[u8],
) -> Result<Option<String>, ConversionError> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

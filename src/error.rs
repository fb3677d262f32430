use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConversionError {
    #[error("failed to parse policy node: {0}")]
    XmlError(String),

    #[error("failed to parse repo-init script: {0}")]
    RepoInitError(String),

    #[error("ACL for '{principal}' targets '{path}', inside the home of '{owner}'")]
    AclCrossesHome {
        principal: String,
        path: String,
        owner: String,
    },

    #[error("path '{0}' cannot be expressed under the enforced path")]
    UnrepresentablePath(String),

    #[error("unknown principal '{0}' for principal policy")]
    UnknownPrincipal(String),

    #[error("invalid service user mapping: {0}")]
    InvalidMapping(String),

    #[error("invalid enforcement configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<quick_xml::Error> for ConversionError {
    fn from(err: quick_xml::Error) -> Self {
        ConversionError::XmlError(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ConversionError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        ConversionError::XmlError(err.to_string())
    }
}

impl From<std::fmt::Error> for ConversionError {
    fn from(err: std::fmt::Error) -> Self {
        ConversionError::RepoInitError(err.to_string())
    }
}

//! Service user mapping descriptors.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

/// `bundle[:subservice]=user` or `bundle[:subservice]=[principal,...]`.
static MAPPING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:=\[\]\s]+)(?::([^:=\[\]\s]+))?=(?:\[([^\[\]]*)\]|([^:=\[\]\s]+))$")
        .expect("mapping pattern is valid")
});

/// One service user mapping, associating a bundle (and optional subservice)
/// with either a single user id or a set of principal names.
///
/// A mapping that names a single user represents the old-style form, which
/// blocks principal-based conversion for that user unless `enforce` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    service_name: String,
    sub_service: Option<String>,
    user: Option<String>,
    principals: Vec<String>,
    enforce: bool,
}

impl Mapping {
    /// Parse a mapping specification, with an explicit force-conversion flag.
    pub fn parse(spec: &str, enforce: bool) -> Result<Self, ConversionError> {
        let captures = MAPPING_PATTERN
            .captures(spec.trim())
            .ok_or_else(|| ConversionError::InvalidMapping(spec.to_string()))?;

        let principals = captures
            .get(3)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Mapping {
            service_name: captures[1].to_string(),
            sub_service: captures.get(2).map(|m| m.as_str().to_string()),
            user: captures.get(4).map(|m| m.as_str().to_string()),
            principals,
            enforce,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn sub_service(&self) -> Option<&str> {
        self.sub_service.as_deref()
    }

    /// True when this mapping names `id` as its single mapped user.
    pub fn maps_user(&self, id: &str) -> bool {
        self.user.as_deref() == Some(id)
    }

    /// True when `id` appears in this mapping's principal list.
    pub fn maps_principal(&self, id: &str) -> bool {
        self.principals.iter().any(|p| p == id)
    }

    pub fn enforce(&self) -> bool {
        self.enforce
    }
}

impl FromStr for Mapping {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mapping::parse(s, false)
    }
}

impl Display for Mapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.service_name)?;
        if let Some(sub) = &self.sub_service {
            write!(f, ":{sub}")?;
        }
        match &self.user {
            Some(user) => write!(f, "={user}"),
            None => write!(f, "=[{}]", self.principals.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn test_parse_user_mapping() {
        let mapping: Mapping = "org.example.bundle:sub=svc-a".parse().unwrap();
        assert_eq!(mapping.service_name(), "org.example.bundle");
        assert_eq!(mapping.sub_service(), Some("sub"));
        assert!(mapping.maps_user("svc-a"));
        assert!(!mapping.maps_principal("svc-a"));
        assert!(!mapping.enforce());
    }

    #[test]
    fn test_parse_principal_mapping() {
        let mapping: Mapping = "org.example.bundle=[svc-a, svc-b]".parse().unwrap();
        assert_eq!(mapping.sub_service(), None);
        assert!(!mapping.maps_user("svc-a"));
        assert!(mapping.maps_principal("svc-a"));
        assert!(mapping.maps_principal("svc-b"));
        assert!(!mapping.maps_principal("svc-c"));
    }

    #[test]
    fn test_parse_with_enforce_flag() {
        let mapping = Mapping::parse("bundle=svc-a", true).unwrap();
        assert!(mapping.enforce());
    }

    #[parameterized(
        missing_target = { "bundle" },
        empty = { "" },
        nested_brackets = { "bundle=[[a]]" },
        trailing_garbage = { "bundle=svc extra" },
    )]
    fn test_parse_rejects(spec: &str) {
        assert!(spec.parse::<Mapping>().is_err());
    }

    #[parameterized(
        user = { "bundle:sub=svc-a" },
        principals = { "bundle=[svc-a,svc-b]" },
    )]
    fn test_display_round_trip(spec: &str) {
        let mapping: Mapping = spec.parse().unwrap();
        assert_eq!(mapping.to_string(), spec);
    }

    #[test]
    fn test_serialized_form() {
        let mapping: Mapping = "bundle:sub=svc-a".parse().unwrap();
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["service_name"], "bundle");
        assert_eq!(json["user"], "svc-a");
        let back: Mapping = serde_json::from_value(json).unwrap();
        assert_eq!(back, mapping);
    }
}

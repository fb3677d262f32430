//! Recollection pass and sub-package version resolution.
//!
//! Conversion runs in two passes so the outcome does not depend on archive
//! order: the recollection pass walks every package, registering
//! authorizables and observing embedded sub-package versions, and only then
//! does the conversion pass rewrite content.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConversionError;
use crate::policy::identity;
use crate::registry::IdentityRegistry;
use crate::traits::{ContentPackage, EntryKind};

/// A package version, ordered numerically on its dot-separated segments.
///
/// Anything after the first non-numeric segment is the qualifier. A version
/// without a qualifier outranks the same version with one, so `1.0`
/// supersedes `1.0-SNAPSHOT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVersion {
    raw: String,
    segments: Vec<u64>,
    qualifier: Option<String>,
}

impl FromStr for PackageVersion {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numeric, dash_qualifier) = match s.split_once('-') {
            Some((head, tail)) => (head, Some(tail)),
            None => (s, None),
        };

        let mut segments = Vec::new();
        let mut trailing = Vec::new();
        for part in numeric.split('.') {
            match part.parse::<u64>() {
                Ok(n) if trailing.is_empty() => segments.push(n),
                _ => trailing.push(part),
            }
        }
        let qualifier = match (trailing.is_empty(), dash_qualifier) {
            (true, None) => None,
            (true, Some(q)) => Some(q.to_string()),
            (false, None) => Some(trailing.join(".")),
            (false, Some(q)) => Some(format!("{}-{q}", trailing.join("."))),
        };

        Ok(PackageVersion {
            raw: s.to_string(),
            segments,
            qualifier,
        })
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.raw)
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        for pair in self.segments.iter().zip_longest(other.segments.iter()) {
            let (a, b) = match pair {
                EitherOrBoth::Both(a, b) => (*a, *b),
                EitherOrBoth::Left(a) => (*a, 0),
                EitherOrBoth::Right(b) => (0, *b),
            };
            match a.cmp(&b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        match (&self.qualifier, &other.qualifier) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

/// Coordinates of an embedded sub-package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageId {
    pub group: String,
    pub name: String,
    pub version: PackageVersion,
}

impl PackageId {
    pub fn new(group: &str, name: &str, version: &str) -> Self {
        // Version parsing is total.
        let Ok(version) = version.parse::<PackageVersion>();
        PackageId {
            group: group.to_string(),
            name: name.to_string(),
            version,
        }
    }

    fn family(&self) -> (String, String) {
        (self.group.clone(), self.name.clone())
    }
}

impl Display for PackageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

/// Tracks the highest observed version per sub-package family, so the
/// conversion pass descends into one version of each and drops the rest.
#[derive(Debug, Default)]
pub struct SubPackageResolver {
    best: HashMap<(String, String), PackageVersion>,
}

impl SubPackageResolver {
    pub fn new() -> Self {
        SubPackageResolver::default()
    }

    pub fn observe(&mut self, id: &PackageId) {
        let entry = self
            .best
            .entry(id.family())
            .or_insert_with(|| id.version.clone());
        if id.version > *entry {
            *entry = id.version.clone();
        }
    }

    /// Whether `id` is the winning version of its family. Unobserved ids
    /// are kept.
    pub fn keeps(&self, id: &PackageId) -> bool {
        match self.best.get(&id.family()) {
            Some(best) => id.version == *best,
            None => true,
        }
    }
}

/// The recollection pass: walk the package and everything embedded in it,
/// registering authorizables and observing sub-package versions. Nothing
/// is rewritten here.
pub fn recollect(
    registry: &mut IdentityRegistry,
    resolver: &mut SubPackageResolver,
    package: &dyn ContentPackage,
) -> Result<(), ConversionError> {
    for entry in package.entries() {
        match &entry.kind {
            EntryKind::PolicyNode(xml) => {
                identity::extract(registry, &entry.path, xml)?;
            }
            EntryKind::RepoInitScript { .. } => {}
            EntryKind::SubPackage { id, package } => {
                debug!(event = "Recollect", sub_package = %id);
                resolver.observe(id);
                recollect(registry, resolver, package.as_ref())?;
            }
        }
    }
    Ok(())
}

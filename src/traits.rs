//! The content-package abstraction consumed by the converter.
//!
//! Unpacking archives is out of scope for this crate; callers present a
//! package as an ordered sequence of entries, nesting sub-packages as
//! further [`ContentPackage`] values.

use crate::scanner::PackageId;
use crate::types::RepoPath;

/// A content package: an ordered walk of the entries the converter cares
/// about. Everything else in the archive is invisible to this crate.
pub trait ContentPackage {
    /// The package's entries, in archive order.
    fn entries(&self) -> Box<dyn Iterator<Item = &PackageEntry> + '_>;
}

/// One entry of a package walk.
pub struct PackageEntry {
    /// Repository path the entry installs to. For a policy node document
    /// this is the path of the node carrying the document.
    pub path: RepoPath,
    pub kind: EntryKind,
}

/// What an entry contains.
pub enum EntryKind {
    /// A serialized XML policy or authorizable node document.
    PolicyNode(String),
    /// A repo-init script, optionally scoped to a run mode.
    RepoInitScript {
        run_mode: Option<String>,
        text: String,
    },
    /// An embedded sub-package.
    SubPackage {
        id: PackageId,
        package: Box<dyn ContentPackage>,
    },
}

/// An in-memory package. The crate's own tests build packages this way,
/// and it suits callers that unpack archives up front.
#[derive(Default)]
pub struct MemoryPackage {
    entries: Vec<PackageEntry>,
}

impl MemoryPackage {
    pub fn new() -> Self {
        MemoryPackage::default()
    }

    pub fn push(&mut self, entry: PackageEntry) {
        self.entries.push(entry);
    }

    pub fn policy_node(mut self, path: &str, xml: &str) -> Self {
        self.entries.push(PackageEntry {
            path: RepoPath::new(path),
            kind: EntryKind::PolicyNode(xml.to_string()),
        });
        self
    }

    pub fn script(mut self, run_mode: Option<&str>, text: &str) -> Self {
        self.entries.push(PackageEntry {
            path: RepoPath::root(),
            kind: EntryKind::RepoInitScript {
                run_mode: run_mode.map(str::to_string),
                text: text.to_string(),
            },
        });
        self
    }

    pub fn sub_package(mut self, id: PackageId, package: impl ContentPackage + 'static) -> Self {
        self.entries.push(PackageEntry {
            path: RepoPath::root(),
            kind: EntryKind::SubPackage {
                id,
                package: Box::new(package),
            },
        });
        self
    }
}

impl ContentPackage for MemoryPackage {
    fn entries(&self) -> Box<dyn Iterator<Item = &PackageEntry> + '_> {
        Box::new(self.entries.iter())
    }
}

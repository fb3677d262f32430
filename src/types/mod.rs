//! Data model types for the conversion run.
//!
//! Canonical string forms:
//! - Paths: `/a/b` (normalized absolute), `/` for the root, `:repository`
//!   for the repository level.
//! - Identities: `SystemUser::"svc-a"`, `User::"alice"`, `Group::"devs"`.
//! - ACL lines: `allow|deny <priv,...> on <path|home(id)|:repository>`
//!   followed by zero or more `restriction(name,value,...)` clauses.

mod ace;
mod identity;
mod mapping;
mod path;

pub use ace::{AccessControlEntry, Restriction};
pub use identity::{Identity, IdentityKind};
pub use mapping::Mapping;
pub use path::RepoPath;

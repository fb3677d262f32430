// src/lib.rs
pub use converter::{ContentDecision, Converter, ScriptBuffers};
pub use error::ConversionError;
pub use registry::{EnforcementPolicy, IdentityRegistry};
pub use traits::{ContentPackage, EntryKind, MemoryPackage, PackageEntry};

pub mod converter;
pub mod error;
pub mod policy;
pub mod registry;
pub mod repoinit;
pub mod scanner;
pub mod traits;
pub mod types;

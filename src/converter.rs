//! End-to-end conversion of a content package.
//!
//! A run is two passes over the same package tree. The recollection pass
//! (see [`crate::scanner`]) registers every authorizable and resolves
//! sub-package versions; the conversion pass then rewrites policy documents
//! and repo-init scripts in archive order. Generated repo-init text lands
//! in the run-mode-less script buffer after everything else, with the
//! principal ACL blocks of the run-wide [`ConversionMap`] flushed last.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConversionError;
use crate::policy::{self, PolicyOutcome, principal, resource};
use crate::registry::{EnforcementPolicy, IdentityRegistry};
use crate::repoinit::{ConversionMap, Rewriter};
use crate::scanner::{self, SubPackageResolver};
use crate::traits::{ContentPackage, EntryKind};
use crate::types::RepoPath;

/// What the repackaged archive should do with one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentDecision {
    Keep,
    Drop,
    /// Keep the entry, but with this content instead of the original.
    Replace(String),
}

/// Rewritten and generated repo-init text, grouped by run mode.
///
/// Buffers appear in first-append order; the `None` buffer collects scripts
/// without a run mode plus everything the conversion itself generates.
#[derive(Debug, Default)]
pub struct ScriptBuffers {
    inner: Vec<(Option<String>, String)>,
}

impl ScriptBuffers {
    fn append(&mut self, run_mode: Option<&str>, text: &str) {
        if text.is_empty() {
            return;
        }
        match self
            .inner
            .iter_mut()
            .find(|(mode, _)| mode.as_deref() == run_mode)
        {
            Some((_, buffer)) => buffer.push_str(text),
            None => self
                .inner
                .push((run_mode.map(str::to_string), text.to_string())),
        }
    }

    pub fn get(&self, run_mode: Option<&str>) -> Option<&str> {
        self.inner
            .iter()
            .find(|(mode, _)| mode.as_deref() == run_mode)
            .map(|(_, text)| text.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Option<&str>, &str)> {
        self.inner
            .iter()
            .map(|(mode, text)| (mode.as_deref(), text.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn clear(&mut self) {
        self.inner.clear();
    }
}

/// Drives one conversion run over a package tree.
pub struct Converter {
    registry: IdentityRegistry,
    map: ConversionMap,
    buffers: ScriptBuffers,
    decisions: Vec<(RepoPath, ContentDecision)>,
}

impl Converter {
    pub fn new(policy: EnforcementPolicy) -> Self {
        Converter {
            registry: IdentityRegistry::new(policy),
            map: ConversionMap::new(),
            buffers: ScriptBuffers::default(),
            decisions: Vec::new(),
        }
    }

    /// Convert one package tree. Results accumulate on the converter and
    /// are read through [`scripts`](Self::scripts) and
    /// [`decisions`](Self::decisions).
    pub fn convert(&mut self, package: &dyn ContentPackage) -> Result<(), ConversionError> {
        info!(event = "Convert", phase = "Recollect");
        let mut resolver = SubPackageResolver::new();
        scanner::recollect(&mut self.registry, &mut resolver, package)?;

        info!(event = "Convert", phase = "Rewrite");
        self.walk(package, &resolver)?;

        info!(event = "Convert", phase = "Emit");
        let mut generated = self.registry.emit_repoinit(&mut self.map)?;
        generated.push_str(&self.map.flush());
        self.buffers.append(None, &generated);
        Ok(())
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn scripts(&self) -> &ScriptBuffers {
        &self.buffers
    }

    /// Per-entry decisions for policy documents and dropped sub-packages,
    /// in conversion order.
    pub fn decisions(&self) -> &[(RepoPath, ContentDecision)] {
        &self.decisions
    }

    /// Clear all run state, keeping the enforcement policy.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.map = ConversionMap::new();
        self.buffers.clear();
        self.decisions.clear();
    }

    fn walk(
        &mut self,
        package: &dyn ContentPackage,
        resolver: &SubPackageResolver,
    ) -> Result<(), ConversionError> {
        for entry in package.entries() {
            match &entry.kind {
                EntryKind::PolicyNode(xml) => {
                    let decision = self.convert_document(&entry.path, xml)?;
                    self.decisions.push((entry.path.clone(), decision));
                }
                EntryKind::RepoInitScript { run_mode, text } => {
                    let rewritten =
                        Rewriter::new(&mut self.registry, &mut self.map).rewrite(text)?;
                    self.buffers.append(run_mode.as_deref(), &rewritten);
                }
                EntryKind::SubPackage { id, package } => {
                    if resolver.keeps(id) {
                        self.walk(package.as_ref(), resolver)?;
                    } else {
                        debug!(event = "Convert", phase = "Superseded", sub_package = %id);
                        self.decisions
                            .push((entry.path.clone(), ContentDecision::Drop));
                    }
                }
            }
        }
        Ok(())
    }

    /// Dispatch one XML document on its root primary type. Authorizable
    /// documents were already consumed by the recollection pass: system
    /// user homes drop in favor of the generated lifecycle statements,
    /// plain users and groups stay in content.
    fn convert_document(
        &mut self,
        path: &RepoPath,
        xml: &str,
    ) -> Result<ContentDecision, ConversionError> {
        let outcome = match policy::document_primary_type(xml)?.as_deref() {
            Some("rep:ACL") => resource::extract(&mut self.registry, path, xml)?,
            Some("rep:PrincipalPolicy") => principal::extract(&mut self.registry, path, xml)?,
            Some("rep:SystemUser") => return Ok(ContentDecision::Drop),
            _ => return Ok(ContentDecision::Keep),
        };
        Ok(match outcome {
            PolicyOutcome::Drop => ContentDecision::Drop,
            PolicyOutcome::Retain => ContentDecision::Keep,
            PolicyOutcome::RetainFiltered(filtered) => ContentDecision::Replace(filtered),
        })
    }
}

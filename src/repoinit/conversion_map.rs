//! Run-wide accumulation of principal-based ACL lines.

use std::fmt::Write;

/// Accumulates ACL lines destined for principal-based regeneration, keyed by
/// `(principal, options)` in first-encounter order.
///
/// The target grammar requires principal-ACL blocks to be contiguous, so
/// lines collected from many source statements flush exactly once into one
/// consolidated `set principal ACL` block per key.
#[derive(Debug, Default)]
pub struct ConversionMap {
    entries: Vec<MapEntry>,
}

#[derive(Debug)]
struct MapEntry {
    principal: String,
    options: Option<String>,
    lines: Vec<String>,
}

impl ConversionMap {
    pub fn new() -> Self {
        ConversionMap::default()
    }

    /// Append one ACL line for a principal, creating the keyed entry on
    /// first encounter.
    pub fn append(&mut self, principal: &str, options: Option<&str>, line: String) {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.principal == principal && e.options.as_deref() == options);
        match entry {
            Some(entry) => entry.lines.push(line),
            None => self.entries.push(MapEntry {
                principal: principal.to_string(),
                options: options.map(str::to_string),
                lines: vec![line],
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain into consolidated `set principal ACL` blocks, one per key, in
    /// first-encounter order. Called exactly once at end-of-run.
    pub fn flush(&mut self) -> String {
        let mut out = String::new();
        for entry in self.entries.drain(..) {
            let _ = write!(out, "set principal ACL for {}", entry.principal);
            if let Some(options) = &entry.options {
                let _ = write!(out, " (ACLOptions={options})");
            }
            out.push('\n');
            for line in &entry.lines {
                let _ = writeln!(out, "    {line}");
            }
            out.push_str("end\n");
        }
        out
    }
}

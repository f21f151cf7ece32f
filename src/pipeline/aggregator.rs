//! Merges selector and retrieval facts into one context bundle per function.
//!
//! Facts are keyed by `(SymbolPath, FactKind)`. Evidence for a key is the
//! union of distinct texts, so the merge is order independent. Facts without a
//! resolved path are kept and flagged for review. When the two sources name
//! the same symbol with different paths, both entries are kept and flagged;
//! neither source is treated as authoritative.

use super::facts::{Fact, FactKind, Provenance, SymbolPath};
use super::model::ModulePathRef;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// Everything known about one symbol for one fact kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub path: SymbolPath,
    pub kind: FactKind,
    /// Distinct evidence texts, sorted.
    pub evidence: BTreeSet<String>,
    pub provenance: BTreeSet<Provenance>,
    /// Highest confidence among the merged facts.
    pub confidence: f32,
    pub needs_review: bool,
    /// Other paths given for a symbol with the same name.
    pub conflicts_with: BTreeSet<SymbolPath>,
}

/// The merged, metadata-tagged evidence for one function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedContext {
    entries: BTreeMap<(SymbolPath, FactKind), ContextEntry>,
}

/// Merge both fact sets. `aggregate(a, b) == aggregate(b, a)` for any inputs,
/// and permuting either input does not change the result.
pub fn aggregate(selector_facts: &[Fact], retrieval_facts: &[Fact]) -> AggregatedContext {
    let mut entries: BTreeMap<(SymbolPath, FactKind), ContextEntry> = BTreeMap::new();

    for fact in selector_facts.iter().chain(retrieval_facts) {
        let entry = entries
            .entry((fact.path.clone(), fact.kind))
            .or_insert_with(|| ContextEntry {
                path: fact.path.clone(),
                kind: fact.kind,
                evidence: BTreeSet::new(),
                provenance: BTreeSet::new(),
                confidence: 0.0,
                needs_review: !fact.path.is_resolved(),
                conflicts_with: BTreeSet::new(),
            });
        entry.evidence.insert(fact.content.trim().to_string());
        entry.provenance.insert(fact.provenance.clone());
        if fact.confidence.total_cmp(&entry.confidence).is_gt() {
            entry.confidence = fact.confidence;
        }
    }

    flag_conflicts(&mut entries);
    AggregatedContext { entries }
}

/// Flag entries whose symbol name also appears under a different path when at
/// least one of the two paths does not resolve.
fn flag_conflicts(entries: &mut BTreeMap<(SymbolPath, FactKind), ContextEntry>) {
    let mut by_name: BTreeMap<String, BTreeSet<SymbolPath>> = BTreeMap::new();
    for (path, _) in entries.keys() {
        if let Some(name) = path.symbol_name() {
            by_name
                .entry(name.to_string())
                .or_default()
                .insert(path.clone());
        }
    }

    for entry in entries.values_mut() {
        let Some(paths) = entry.path.symbol_name().and_then(|name| by_name.get(name)) else {
            continue;
        };
        for other in paths {
            if *other != entry.path && !(other.is_resolved() && entry.path.is_resolved()) {
                entry.conflicts_with.insert(other.clone());
            }
        }
        if !entry.conflicts_with.is_empty() {
            entry.needs_review = true;
        }
    }
}

impl AggregatedContext {
    pub fn entries(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries without a resolved path or with a conflicting path.
    pub fn needs_review(&self) -> Vec<&ContextEntry> {
        self.entries().filter(|e| e.needs_review).collect()
    }

    /// Every resolved path the context mentions.
    pub fn resolved_paths(&self) -> BTreeSet<&ModulePathRef> {
        self.entries().filter_map(|e| e.path.resolved()).collect()
    }

    /// Total number of distinct evidence texts.
    pub fn evidence_count(&self) -> usize {
        self.entries().map(|e| e.evidence.len()).sum()
    }

    /// Prompt rendering, grouped by symbol.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "(no related context found)\n".to_string();
        }

        let mut out = String::new();
        let mut current: Option<&SymbolPath> = None;
        for ((path, kind), entry) in &self.entries {
            if current != Some(path) {
                let _ = writeln!(out, "\n## {}", path);
                current = Some(path);
            }
            let sources = entry
                .provenance
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "- {} (confidence {:.2}; from {}){}",
                kind,
                entry.confidence,
                sources,
                if entry.needs_review { " [needs-review]" } else { "" }
            );
            for evidence in &entry.evidence {
                let _ = writeln!(out, "  * {}", evidence);
            }
            if !entry.conflicts_with.is_empty() {
                let others = entry
                    .conflicts_with
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(out, "  * also reported as: {}", others);
            }
        }
        out
    }
}

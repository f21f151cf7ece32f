//! Relevance selection: which other files hold property-relevant logic.
//!
//! One oracle round trip ranks files from the project tree; a second extracts
//! facts from the Top-N files' contents. Entries without a usable module path
//! guess are rejected and logged. Oracle failures degrade to an empty
//! selection instead of aborting the pipeline.

use super::error::PipelineError;
use super::facts::{Fact, FactKind, Provenance, SymbolPath};
use super::model::{CandidateFile, FunctionInfo, ModulePathRef, NotableSymbol};
use super::prompts::{self, FactsResponse, SelectFilesResponse, SelectedFile};
use crate::catalog::FunctionCatalog;
use crate::oracle::{ask, LanguageOracle};
use crate::project::TreeDescription;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::Path;

/// Result of ranking files for one function.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// At most `top_n`, in the oracle's order.
    pub candidates: Vec<CandidateFile>,
    /// Metadata-completeness violations, one per rejected entry.
    pub rejected: Vec<PipelineError>,
    pub failure: Option<PipelineError>,
}

/// Everything the selector contributes to a function's context.
#[derive(Debug, Clone, Default)]
pub struct SelectorOutput {
    pub candidates: Vec<CandidateFile>,
    pub facts: Vec<Fact>,
    pub notes: Vec<PipelineError>,
}

pub struct RelevanceSelector<'a> {
    oracle: &'a dyn LanguageOracle,
    catalog: &'a FunctionCatalog,
    project_root: &'a Path,
    max_chars: usize,
}

impl<'a> RelevanceSelector<'a> {
    pub fn new(
        oracle: &'a dyn LanguageOracle,
        catalog: &'a FunctionCatalog,
        project_root: &'a Path,
        max_chars: usize,
    ) -> Self {
        Self {
            oracle,
            catalog,
            project_root,
            max_chars,
        }
    }

    /// Rank files, then extract facts from the selected ones.
    pub async fn gather(
        &self,
        function: &FunctionInfo,
        tree: &TreeDescription,
        top_n: NonZeroUsize,
    ) -> SelectorOutput {
        let selection = self.select(function, tree, top_n).await;
        let mut notes = selection.rejected;
        notes.extend(selection.failure);

        let mut facts = candidate_facts(&selection.candidates);
        match self.extract_facts(function, &selection.candidates).await {
            Ok(extracted) => facts.extend(extracted),
            Err(e) => {
                tracing::warn!(function = %function.path, "{}", e);
                notes.push(e);
            }
        }

        SelectorOutput {
            candidates: selection.candidates,
            facts,
            notes,
        }
    }

    /// Ask the oracle for the Top-N relevant files. Never more than `top_n`.
    pub async fn select(
        &self,
        function: &FunctionInfo,
        tree: &TreeDescription,
        top_n: NonZeroUsize,
    ) -> Selection {
        let request = prompts::select_files(function, tree, top_n.get(), self.max_chars);
        let response: SelectFilesResponse = match ask(self.oracle, &request).await {
            Ok(response) => response,
            Err(e) => {
                let failure = PipelineError::SelectionFailed(e.to_string());
                tracing::warn!(function = %function.path, "{}", failure);
                return Selection {
                    failure: Some(failure),
                    ..Default::default()
                };
            }
        };

        let mut selection = Selection::default();
        let mut seen = BTreeSet::new();
        for entry in response.selected_files {
            if selection.candidates.len() == top_n.get() {
                break;
            }
            match self.accept(entry, selection.candidates.len() + 1) {
                Ok(candidate) => {
                    if seen.insert(candidate.rel_path.clone()) {
                        selection.candidates.push(candidate);
                    }
                }
                Err(violation) => {
                    tracing::warn!(
                        function = %function.path,
                        "Metadata-completeness violation, rejecting candidate: {}",
                        violation
                    );
                    selection.rejected.push(violation);
                }
            }
        }

        tracing::debug!(
            function = %function.path,
            "Selected {} candidate file(s), rejected {}",
            selection.candidates.len(),
            selection.rejected.len()
        );
        selection
    }

    /// Turn one oracle entry into a candidate, or explain why it was rejected.
    fn accept(&self, entry: SelectedFile, rank: usize) -> Result<CandidateFile, PipelineError> {
        let rel_path = normalize_rel_path(&entry.rel_path);
        let located = self
            .locate(&rel_path)
            .or_else(|| self.locate_module(entry.module_path.as_deref()));
        let Some((rel_path, module)) = located else {
            return Err(PipelineError::MetadataMissing(format!(
                "`{}` is not a catalogued source file",
                entry.rel_path
            )));
        };

        let has_guess = entry
            .notable_symbols
            .iter()
            .any(|s| parse_guess(s.module_path.as_deref()).is_some());
        if !has_guess {
            return Err(PipelineError::MetadataMissing(format!(
                "`{}` has no module path for any exported symbol",
                rel_path
            )));
        }

        let symbols = entry
            .notable_symbols
            .into_iter()
            .map(|raw| {
                let path = self.resolve_symbol(&module, &raw.name, raw.module_path.as_deref());
                NotableSymbol {
                    name: raw.name,
                    kind: raw.kind,
                    path,
                    role: raw.role_for_pbt,
                }
            })
            .collect();

        Ok(CandidateFile {
            rel_path,
            module_path: Some(module),
            rank,
            rationale: entry.reason.trim().to_string(),
            symbols,
        })
    }

    /// The module for an oracle-supplied file path. Tolerates a leading
    /// project directory name as printed at the top of the tree.
    fn locate(&self, rel_path: &str) -> Option<(String, ModulePathRef)> {
        if let Some(module) = self.catalog.module_for_file(rel_path) {
            return Some((rel_path.to_string(), module.clone()));
        }
        let (_, rest) = rel_path.split_once('/')?;
        let module = self.catalog.module_for_file(rest)?;
        Some((rest.to_string(), module.clone()))
    }

    /// The file behind the oracle's module path for an entry whose file path
    /// did not match.
    fn locate_module(&self, module: Option<&str>) -> Option<(String, ModulePathRef)> {
        let module = parse_guess(module)?;
        let file = self.catalog.file_for_module(&module)?;
        Some((file.to_string(), module))
    }

    /// Resolve a symbol guess, falling back to the name inside the file's own
    /// module when that name is catalogued there.
    fn resolve_symbol(&self, module: &ModulePathRef, name: &str, guess: Option<&str>) -> SymbolPath {
        let resolved = self.catalog.resolve(guess);
        if resolved.is_resolved() {
            return resolved;
        }
        match module.child(name.trim()) {
            Some(path) if self.catalog.contains(&path) => SymbolPath::Resolved(path),
            _ => resolved,
        }
    }

    /// Second round trip: facts from the selected files' contents.
    pub async fn extract_facts(
        &self,
        function: &FunctionInfo,
        candidates: &[CandidateFile],
    ) -> Result<Vec<Fact>, PipelineError> {
        let mut files = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match tokio::fs::read_to_string(self.project_root.join(&candidate.rel_path)).await {
                Ok(content) => files.push((candidate.clone(), content)),
                Err(e) => tracing::warn!(
                    function = %function.path,
                    "Could not read candidate {}: {}",
                    candidate.rel_path,
                    e
                ),
            }
        }
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let request = prompts::extract_file_facts(function, &files, self.max_chars);
        let response: FactsResponse = ask(self.oracle, &request)
            .await
            .map_err(|e| PipelineError::SelectionFailed(format!("fact extraction: {}", e)))?;

        Ok(facts_from_response(
            &response,
            function,
            self.catalog,
            Provenance::FileExtraction,
        ))
    }
}

/// Symbol and rationale facts named directly by the selection.
fn candidate_facts(candidates: &[CandidateFile]) -> Vec<Fact> {
    let mut facts = Vec::new();
    for candidate in candidates {
        let provenance = Provenance::Candidate {
            file: candidate.rel_path.clone(),
            rank: candidate.rank,
        };
        if let (Some(module), false) = (&candidate.module_path, candidate.rationale.is_empty()) {
            facts.push(Fact::new(
                FactKind::Description,
                candidate.rationale.clone(),
                SymbolPath::Resolved(module.clone()),
                provenance.clone(),
            ));
        }
        for symbol in &candidate.symbols {
            let content = match (symbol.kind.trim(), symbol.role.trim()) {
                ("", "") => symbol.name.clone(),
                ("", role) => format!("{}: {}", symbol.name, role),
                (kind, "") => format!("{} ({})", symbol.name, kind),
                (kind, role) => format!("{} ({}): {}", symbol.name, kind, role),
            };
            facts.push(Fact::new(
                FactKind::Symbol,
                content,
                symbol.path.clone(),
                provenance.clone(),
            ));
        }
    }
    facts
}

/// Convert an extraction response into facts. Statements about the target are
/// attributed to its own path; relationships go through the catalogue.
pub(crate) fn facts_from_response(
    response: &FactsResponse,
    function: &FunctionInfo,
    catalog: &FunctionCatalog,
    provenance: Provenance,
) -> Vec<Fact> {
    let target = SymbolPath::Resolved(function.path.clone());
    let mut facts = Vec::new();

    let mut push = |kind: FactKind, text: &str, path: SymbolPath| {
        let text = text.trim();
        if !text.is_empty() {
            facts.push(Fact::new(kind, text, path, provenance.clone()));
        }
    };

    push(FactKind::Description, &response.description, target.clone());
    for (kind, items) in [
        (FactKind::Invariant, &response.invariants),
        (FactKind::Precondition, &response.preconditions),
        (FactKind::Postcondition, &response.postconditions),
        (FactKind::Example, &response.examples),
    ] {
        for item in items {
            push(kind, item, target.clone());
        }
    }
    for relationship in &response.relationships {
        let text = if relationship.kind.trim().is_empty() {
            relationship.description.clone()
        } else {
            format!("{}: {}", relationship.kind.trim(), relationship.description.trim())
        };
        let path = catalog.resolve(relationship.related_symbol_module_path.as_deref());
        if !path.is_resolved() {
            tracing::warn!(
                function = %function.path,
                "Metadata-completeness violation, keeping relationship for review: {}",
                path
            );
        }
        push(FactKind::Relationship, &text, path);
    }

    facts
}

fn parse_guess(raw: Option<&str>) -> Option<ModulePathRef> {
    raw.and_then(ModulePathRef::parse)
}

fn normalize_rel_path(raw: &str) -> String {
    let path = raw.trim().trim_matches('`').replace('\\', "/");
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

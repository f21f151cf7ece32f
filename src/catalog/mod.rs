//! The function catalogue.
//!
//! Holds every importable callable of the project in a stable order, together
//! with the module and symbol tables used to resolve oracle-supplied paths.
//! Built once per run and shared read-only by every pipeline.

use crate::language::{slash_path, Language};
use crate::pipeline::facts::SymbolPath;
use crate::pipeline::model::{FunctionInfo, ModulePathRef};
use crate::project_config::ProjectConfig;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Catalogued callables plus everything a path guess can resolve against.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    functions: Vec<FunctionInfo>,
    index: BTreeMap<ModulePathRef, usize>,
    /// module path → project-relative file
    modules: BTreeMap<ModulePathRef, String>,
    /// project-relative file → module path
    files: BTreeMap<String, ModulePathRef>,
    /// Functions, methods, classes, and top-level exported names.
    symbols: BTreeSet<ModulePathRef>,
}

/// The functions a run will process, plus requested targets that matched nothing.
#[derive(Debug, Clone, Default)]
pub struct CatalogScope {
    pub targets: Vec<FunctionInfo>,
    pub skipped: Vec<ModulePathRef>,
}

impl FunctionCatalog {
    /// Build a catalogue from project-relative source files and their contents.
    /// Files are processed in the given order; functions keep source order.
    pub fn build(
        language: Language,
        sources: impl IntoIterator<Item = (PathBuf, String)>,
        source_roots: &[String],
    ) -> Self {
        let mut catalog = Self::default();

        for (rel_path, source) in sources {
            let Some(module) = language.module_path(&rel_path, source_roots) else {
                tracing::debug!("Skipping {}: not an importable module", rel_path.display());
                continue;
            };
            let rel = slash_path(&rel_path);
            let scan = language.scan(&source);

            catalog.modules.insert(module.clone(), rel.clone());
            catalog.files.insert(rel.clone(), module.clone());

            for class in &scan.classes {
                if let Some(path) = ModulePathRef::parse(&format!("{}.{}", module, class)) {
                    catalog.symbols.insert(path);
                }
            }
            for name in &scan.exported {
                if let Some(path) = module.child(name) {
                    catalog.symbols.insert(path);
                }
            }
            for function in scan.functions {
                let dotted = function
                    .classes
                    .iter()
                    .chain(std::iter::once(&function.name))
                    .fold(module.to_string(), |acc, seg| format!("{}.{}", acc, seg));
                let Some(path) = ModulePathRef::parse(&dotted) else {
                    continue;
                };
                if catalog.index.contains_key(&path) {
                    // Redefinition: the later definition wins at import time.
                    let slot = catalog.index[&path];
                    catalog.functions[slot].start_line = function.start_line;
                    catalog.functions[slot].end_line = function.end_line;
                    catalog.functions[slot].source = function.source;
                    continue;
                }
                catalog.symbols.insert(path.clone());
                catalog.index.insert(path.clone(), catalog.functions.len());
                catalog.functions.push(FunctionInfo {
                    path,
                    file: PathBuf::from(&rel),
                    start_line: function.start_line,
                    end_line: function.end_line,
                    source: function.source,
                    in_class: !function.classes.is_empty(),
                });
            }
        }

        catalog
    }

    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Catalogue position of a function, used to order run results.
    pub fn position(&self, path: &ModulePathRef) -> Option<usize> {
        self.index.get(path).copied()
    }

    pub fn is_module(&self, path: &ModulePathRef) -> bool {
        self.modules.contains_key(path)
    }

    /// Whether `import path` would succeed: a known module or a package
    /// directory containing one.
    pub fn is_importable(&self, path: &ModulePathRef) -> bool {
        self.modules
            .range(path.clone()..)
            .next()
            .is_some_and(|(module, _)| module.starts_with(path))
    }

    /// Whether a path names a known module, package directory, or symbol.
    pub fn contains(&self, path: &ModulePathRef) -> bool {
        self.is_importable(path) || self.symbols.contains(path)
    }

    pub fn module_for_file(&self, rel_path: &str) -> Option<&ModulePathRef> {
        self.files.get(rel_path)
    }

    /// The project-relative file defining a module.
    pub fn file_for_module(&self, module: &ModulePathRef) -> Option<&str> {
        self.modules.get(module).map(String::as_str)
    }

    /// Top-level package names of the project.
    pub fn project_roots(&self) -> BTreeSet<&str> {
        self.modules.keys().map(|m| m.root()).collect()
    }

    /// Map an oracle-supplied path guess onto the catalogue. A guess is never
    /// promoted to resolved unless it names a known module or symbol.
    pub fn resolve(&self, raw: Option<&str>) -> SymbolPath {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return SymbolPath::Missing;
        };
        match ModulePathRef::parse(raw) {
            Some(path) if self.contains(&path) => SymbolPath::Resolved(path),
            Some(path) => SymbolPath::Unresolved(path.to_string()),
            None => SymbolPath::Unresolved(raw.to_string()),
        }
    }

    /// The longest known module that is a prefix of `path`.
    pub fn module_of(&self, path: &ModulePathRef) -> Option<ModulePathRef> {
        let mut current = Some(path.clone());
        while let Some(candidate) = current {
            if self.is_module(&candidate) {
                return Some(candidate);
            }
            current = candidate.parent();
        }
        None
    }

    /// The import statement that brings `path` (or its enclosing class) into scope.
    pub fn import_line(&self, path: &ModulePathRef) -> Option<String> {
        if self.is_importable(path) {
            return Some(format!("import {}", path));
        }
        let module = self.module_of(path)?;
        let rest = &path.as_str()[module.as_str().len() + 1..];
        let first = rest.split('.').next()?;
        Some(format!("from {} import {}", module, first))
    }

    /// Select the functions named by `targets`. An empty target list selects
    /// everything. A target may name a function, or a module or class whose
    /// functions are all selected. Targets matching nothing are skipped.
    pub fn select(&self, targets: &[ModulePathRef]) -> CatalogScope {
        if targets.is_empty() {
            return CatalogScope {
                targets: self.functions.clone(),
                skipped: Vec::new(),
            };
        }

        let mut chosen = BTreeSet::new();
        let mut skipped = Vec::new();
        for target in targets {
            let mut matched = false;
            for (slot, function) in self.functions.iter().enumerate() {
                if function.path.starts_with(target) {
                    chosen.insert(slot);
                    matched = true;
                }
            }
            if !matched {
                skipped.push(target.clone());
            }
        }

        CatalogScope {
            targets: chosen
                .into_iter()
                .map(|slot| self.functions[slot].clone())
                .collect(),
            skipped,
        }
    }
}

/// Produces the function catalogue for a project root.
pub trait CatalogProvider {
    fn catalog(&self, project_root: &Path) -> Result<FunctionCatalog>;

    /// Catalogue the project and select `targets` from it.
    fn catalog_scope(
        &self,
        project_root: &Path,
        targets: &[ModulePathRef],
    ) -> Result<(FunctionCatalog, CatalogScope)> {
        let catalog = self.catalog(project_root)?;
        let scope = catalog.select(targets);
        Ok((catalog, scope))
    }
}

/// Catalogue provider reading source files from disk.
pub struct SourceCatalog {
    language: Language,
    config: ProjectConfig,
}

impl SourceCatalog {
    pub fn new(language: Language, config: ProjectConfig) -> Self {
        Self { language, config }
    }
}

impl CatalogProvider for SourceCatalog {
    fn catalog(&self, project_root: &Path) -> Result<FunctionCatalog> {
        let files = self.language.find_source_files(project_root, &self.config)?;
        let mut sources = Vec::with_capacity(files.len());
        for rel_path in files {
            match std::fs::read_to_string(project_root.join(&rel_path)) {
                Ok(content) => sources.push((rel_path, content)),
                Err(e) => {
                    tracing::warn!("Skipping unreadable file {}: {}", rel_path.display(), e)
                }
            }
        }
        let catalog = FunctionCatalog::build(self.language, sources, &self.config.source_roots);
        tracing::info!(
            "Catalogued {} {} functions across {} modules",
            catalog.len(),
            self.language,
            catalog.modules.len()
        );
        Ok(catalog)
    }
}

//! Language abstraction layer.
//!
//! Everything language specific the pipeline needs lives behind [`Language`]:
//! finding source files, inferring module paths, and scanning definitions.

mod python;

use crate::pipeline::model::ModulePathRef;
use crate::project_config::ProjectConfig;
use anyhow::Result;
use std::path::{Path, PathBuf};

pub use python::{slash_path, ModuleScan, PythonLanguage};

/// Supported target languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
}

impl Language {
    /// Detect the language of a project from its marker files.
    pub fn detect(project_root: &Path) -> Option<Self> {
        const PYTHON_MARKERS: &[&str] = &[
            "pyproject.toml",
            "setup.py",
            "setup.cfg",
            "requirements.txt",
        ];
        if PYTHON_MARKERS
            .iter()
            .any(|marker| project_root.join(marker).exists())
        {
            return Some(Language::Python);
        }
        None
    }

    /// Human-readable name for the language.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
        }
    }

    /// Find all source files in a directory, relative to it and sorted.
    pub fn find_source_files(&self, dir: &Path, config: &ProjectConfig) -> Result<Vec<PathBuf>> {
        match self {
            Language::Python => PythonLanguage.find_source_files(dir, config),
        }
    }

    /// Infer the module path of a project-relative source file.
    pub fn module_path(&self, rel_path: &Path, source_roots: &[String]) -> Option<ModulePathRef> {
        match self {
            Language::Python => PythonLanguage.module_path(rel_path, source_roots),
        }
    }

    /// Scan one module's source.
    pub fn scan(&self, source: &str) -> ModuleScan {
        match self {
            Language::Python => PythonLanguage.scan(source),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

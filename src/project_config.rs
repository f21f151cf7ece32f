//! Project-level configuration.
//!
//! Handles loading `.pbtgen.toml` from the root of the project under test. It
//! controls which source files are catalogued and how module paths are inferred.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

const FILE_NAME: &str = ".pbtgen.toml";

/// Project-level configuration loaded from `.pbtgen.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Glob patterns (project-relative, `/`-separated) excluded from the catalogue.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Leading directories stripped when inferring module paths.
    #[serde(default = "default_source_roots")]
    pub source_roots: Vec<String>,
}

fn default_source_roots() -> Vec<String> {
    vec!["src".to_string()]
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            source_roots: default_source_roots(),
        }
    }
}

impl ProjectConfig {
    /// Check if `.pbtgen.toml` exists in the project.
    pub fn exists(project_root: &Path) -> bool {
        project_root.join(FILE_NAME).exists()
    }

    /// Load configuration from `.pbtgen.toml`.
    ///
    /// A missing, empty, or whitespace-only file yields the defaults. A file that
    /// does not parse is an error.
    pub fn load(project_root: &Path) -> Result<Self> {
        if !Self::exists(project_root) {
            return Ok(Self::default());
        }
        let config_path = project_root.join(FILE_NAME);
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {:?}", config_path))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(&content).with_context(|| format!("Failed to parse {:?}", config_path))
    }

    /// Exclude a project-relative directory and everything under it.
    pub fn exclude_dir(&mut self, rel_dir: &str) {
        let rel_dir = rel_dir.trim_matches('/');
        if rel_dir.is_empty() {
            return;
        }
        for pattern in [rel_dir.to_string(), format!("{}/**", rel_dir)] {
            if !self.exclude.contains(&pattern) {
                self.exclude.push(pattern);
            }
        }
    }

    /// Whether a project-relative path matches any exclude glob.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        self.exclude
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, rel_path))
    }
}
